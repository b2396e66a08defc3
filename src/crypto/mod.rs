//! Cryptographic primitives
//!
//! BIP-39 mnemonics, BIP-32 hierarchical derivation, hashing, authenticated
//! encryption, and Shamir secret sharing. Everything above this module
//! (keystore, address derivation, signing services) builds on these types.

pub mod cipher;
pub mod hash;
pub mod hd;
pub mod mnemonic;
pub mod shamir;

pub use hd::{parse_path, ExtendedKey};
pub use mnemonic::{Mnemonic, WordCount};
