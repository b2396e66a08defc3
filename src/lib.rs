//! Custodial wallet backend core
//!
//! Key management (BIP-39/BIP-32, encrypted keystore, Shamir sharing),
//! watch-only deposit address derivation, chain observation with a
//! transactional outbox, deposit sweeping into a hot wallet, and a
//! multi-signature withdrawal pipeline. Storage, bus, lock, and cache are
//! capability traits so the edge can wire real infrastructure behind them.

pub mod address;
pub mod broadcaster;
pub mod bus;
pub mod cache;
pub mod chain;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keystore;
pub mod lock;
pub mod model;
pub mod observer;
pub mod relay;
pub mod store;
pub mod sweeper;
pub mod withdraw;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
