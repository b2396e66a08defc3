//! Error types for the wallet backend

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the wallet backend
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid derivation path '{0}'")]
    InvalidPath(String),

    #[error("Invalid seed length: {0} bytes (expected 16..=64)")]
    InvalidSeedLength(usize),

    #[error("Invalid Shamir share: {0}")]
    InvalidShare(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    // Credential errors
    #[error("Wrong password or corrupted keystore")]
    WrongPasswordOrCorrupt,

    #[error("Malformed keystore envelope: {0}")]
    MalformedEnvelope(String),

    // Key capability errors
    #[error("Hardened derivation requires a private parent key")]
    HardenedDerivationRequiresPrivate,

    #[error("Operation requires a private key")]
    PrivateKeyRequired,

    #[error("Derivation failed: {0}")]
    Derivation(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    // Not found
    #[error("No deposit address for user {user_id} on chain {chain}")]
    AddressNotFound { user_id: u64, chain: String },

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(u64),

    #[error("Deposit not found for tx {0}")]
    DepositNotFound(String),

    // Conflicts (idempotency keys)
    #[error("Deposit already recorded for tx {0}")]
    DuplicateDeposit(String),

    #[error("Collection already recorded for deposit {0}")]
    DuplicateCollection(u64),

    #[error("Admin {admin_id} already reviewed withdrawal {withdrawal_id}")]
    DuplicateReview { withdrawal_id: u64, admin_id: u64 },

    #[error("Deposit address already exists for user {user_id} on chain {chain}")]
    AddressExists { user_id: u64, chain: String },

    #[error("Path index {index} already taken on chain {chain}")]
    PathIndexTaken { chain: String, index: u32 },

    #[error("Withdrawal {id} is not in {expected} state")]
    InvalidState { id: u64, expected: String },

    // Transient I/O
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Lock error: {0}")]
    Lock(String),

    // Configuration / environment
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_) | Error::Store(_) | Error::Bus(_) | Error::Lock(_)
        )
    }

    /// Check if this error represents a uniqueness conflict.
    ///
    /// A conflict usually means another worker already completed the same
    /// unit of work, so callers treat it as idempotent success.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::DuplicateDeposit(_)
                | Error::DuplicateCollection(_)
                | Error::DuplicateReview { .. }
                | Error::AddressExists { .. }
                | Error::PathIndexTaken { .. }
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Rpc(e.to_string())
    }
}
