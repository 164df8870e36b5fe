//! Error types for the transfer engine

use crate::types::{TransferId, TransferStatus};
use limit_enforcer::Denial;
use thiserror::Error;

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transfer errors
#[derive(Error, Debug)]
pub enum Error {
    /// Sender cannot cover amount plus fee
    #[error("Insufficient balance for {user_id}: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Sender
        user_id: String,
        /// Spendable points at the time of the attempt
        available: u64,
        /// `amount + fee`
        requested: u64,
    },

    /// Self-transfer or unknown recipient
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// User identifier rejected
    #[error("Invalid user id: {0}")]
    InvalidUser(String),

    /// Zero amount or overflowing amount plus fee
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Negative or oversized time-to-live
    #[error("Invalid ttl: {0}")]
    InvalidTtl(String),

    /// Batch request rejected before any transfer was attempted
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// No such transfer, or not visible to the caller
    #[error("Transfer {0} not found")]
    NotFound(TransferId),

    /// Only the sender may cancel
    #[error("Only the sender may cancel transfer {0}")]
    NotSender(TransferId),

    /// Only the recipient may accept or reject
    #[error("Only the recipient may resolve transfer {0}")]
    NotRecipient(TransferId),

    /// Transfer already left `pending`
    #[error("Transfer {id} already resolved ({status})")]
    AlreadyResolved {
        /// Transfer
        id: TransferId,
        /// Terminal status it holds
        status: TransferStatus,
    },

    /// Deadline passed; only the scheduler may close it
    #[error("Transfer {0} has expired")]
    Expired(TransferId),

    /// Expiry requested before the deadline
    #[error("Transfer {0} is not yet due for expiry")]
    NotYetDue(TransferId),

    /// Same transfer id reused with different parameters
    #[error("Transfer id {0} already used with different parameters")]
    IdempotencyConflict(TransferId),

    /// Sender's `transfer_send` cap reached
    #[error("Limit exceeded: {0}")]
    LimitExceeded(Denial),

    /// Another expiration batch is running
    #[error("Expiration batch already in progress")]
    BatchInProgress,

    /// Ledger or durable store failure
    #[error("Ledger error: {0}")]
    Ledger(points_ledger::Error),

    /// Limit configuration error
    #[error("Limit error: {0}")]
    Limit(String),

    /// Scheduler task failure
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Durable store unavailable; the operation did not happen and may be retried
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Error::Ledger(e) if e.is_storage_failure())
    }
}

impl From<points_ledger::Error> for Error {
    fn from(err: points_ledger::Error) -> Self {
        match err {
            points_ledger::Error::InsufficientBalance {
                user_id,
                available,
                requested,
            } => Error::InsufficientBalance {
                user_id,
                available,
                requested,
            },
            points_ledger::Error::InvalidAmount(msg) => Error::InvalidAmount(msg),
            points_ledger::Error::InvalidUserId(msg) => Error::InvalidUser(msg),
            other => Error::Ledger(other),
        }
    }
}

impl From<limit_enforcer::Error> for Error {
    fn from(err: limit_enforcer::Error) -> Self {
        match err {
            limit_enforcer::Error::Denied(denial) => Error::LimitExceeded(denial),
            limit_enforcer::Error::Ledger(e) => Error::from(e),
            limit_enforcer::Error::InvalidRule(msg) => Error::Limit(msg),
        }
    }
}
