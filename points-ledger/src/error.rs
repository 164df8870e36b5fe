//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Spend would take `available` below zero
    #[error("Insufficient balance for {user_id}: available {available}, requested {requested}")]
    InsufficientBalance {
        /// User whose balance was checked
        user_id: String,
        /// Available points at the time of the check
        available: u64,
        /// Points the posting asked for
        requested: u64,
    },

    /// Amount must be strictly positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// No balance row exists for the user
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// User identifier rejected
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    /// Pagination arguments out of range
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    /// Counter overflow (would exceed u64)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the failure came from the durable store rather than the request
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Io(_) | Error::Serialization(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
