//! Service errors and their user-facing categories

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for service calls
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Transfer workflow error
    #[error(transparent)]
    Transfer(#[from] transfer_engine::Error),

    /// Limit enforcer error
    #[error(transparent)]
    Limit(#[from] limit_enforcer::Error),

    /// Ledger error
    #[error(transparent)]
    Ledger(#[from] points_ledger::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Blocking task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),
}

/// What a caller can do about an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Not enough points
    InsufficientBalance,
    /// Daily or weekly cap reached
    LimitExceeded,
    /// Request is malformed
    Validation,
    /// Caller may not act on the resource
    Authorization,
    /// Resource is in the wrong state
    Conflict,
    /// Resource does not exist
    NotFound,
    /// Temporary failure; retrying is safe
    Unavailable,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::InsufficientBalance => "insufficient_balance",
            ErrorCategory::LimitExceeded => "limit_exceeded",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// Serializable error summary for callers
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Category
    pub category: ErrorCategory,
    /// Human-readable message
    pub message: String,
    /// Whether the same call may succeed later
    pub retryable: bool,
}

impl ServiceError {
    /// Category for UI messaging
    pub fn category(&self) -> ErrorCategory {
        match self {
            ServiceError::Transfer(e) => transfer_category(e),
            ServiceError::Limit(e) => limit_category(e),
            ServiceError::Ledger(e) => ledger_category(e),
            ServiceError::Config(_) => ErrorCategory::Validation,
            ServiceError::Metrics(_) | ServiceError::Task(_) => ErrorCategory::Unavailable,
        }
    }

    /// Only transient failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Unavailable
    }

    /// Summary for callers
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            category: self.category(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

fn transfer_category(err: &transfer_engine::Error) -> ErrorCategory {
    use transfer_engine::Error;
    match err {
        Error::InsufficientBalance { .. } => ErrorCategory::InsufficientBalance,
        Error::LimitExceeded(_) => ErrorCategory::LimitExceeded,
        Error::InvalidRecipient(_)
        | Error::InvalidUser(_)
        | Error::InvalidAmount(_)
        | Error::InvalidTtl(_)
        | Error::InvalidBatch(_)
        | Error::Config(_)
        | Error::Limit(_) => ErrorCategory::Validation,
        Error::NotSender(_) | Error::NotRecipient(_) => ErrorCategory::Authorization,
        Error::AlreadyResolved { .. }
        | Error::Expired(_)
        | Error::NotYetDue(_)
        | Error::IdempotencyConflict(_)
        | Error::BatchInProgress => ErrorCategory::Conflict,
        Error::NotFound(_) => ErrorCategory::NotFound,
        Error::Ledger(e) => ledger_category(e),
        Error::Scheduler(_) => ErrorCategory::Unavailable,
    }
}

fn limit_category(err: &limit_enforcer::Error) -> ErrorCategory {
    match err {
        limit_enforcer::Error::Denied(_) => ErrorCategory::LimitExceeded,
        limit_enforcer::Error::InvalidRule(_) => ErrorCategory::Validation,
        limit_enforcer::Error::Ledger(e) => ledger_category(e),
    }
}

fn ledger_category(err: &points_ledger::Error) -> ErrorCategory {
    use points_ledger::Error;
    match err {
        Error::InsufficientBalance { .. } => ErrorCategory::InsufficientBalance,
        Error::AccountNotFound(_) => ErrorCategory::NotFound,
        Error::InvalidAmount(_)
        | Error::InvalidUserId(_)
        | Error::InvalidPage(_)
        | Error::InvariantViolation(_)
        | Error::Config(_) => ErrorCategory::Validation,
        Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => ErrorCategory::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limit_enforcer::{ActionType, Denial, DenyReason};
    use uuid::Uuid;

    #[test]
    fn test_actionable_errors_distinguished_from_outages() {
        let broke = ServiceError::from(transfer_engine::Error::InsufficientBalance {
            user_id: "alice".to_string(),
            available: 1,
            requested: 5,
        });
        assert_eq!(broke.category(), ErrorCategory::InsufficientBalance);
        assert!(!broke.is_retryable());

        let capped = ServiceError::from(transfer_engine::Error::LimitExceeded(Denial {
            action: ActionType::TransferSend,
            reason: DenyReason::WeeklyCapExceeded,
            cap: 100,
            used: 100,
            requested: 1,
        }));
        assert_eq!(capped.category(), ErrorCategory::LimitExceeded);

        let down = ServiceError::from(points_ledger::Error::Storage("io".to_string()));
        assert_eq!(down.category(), ErrorCategory::Unavailable);
        assert!(down.is_retryable());
    }

    #[test]
    fn test_workflow_errors() {
        let id = Uuid::now_v7();
        let wrong_user = ServiceError::from(transfer_engine::Error::NotSender(id));
        assert_eq!(wrong_user.category(), ErrorCategory::Authorization);

        let late = ServiceError::from(transfer_engine::Error::Expired(id));
        assert_eq!(late.category(), ErrorCategory::Conflict);

        let nested = ServiceError::from(transfer_engine::Error::Ledger(
            points_ledger::Error::Storage("io".to_string()),
        ));
        assert!(nested.is_retryable());
    }

    #[test]
    fn test_counter_overflow_not_retryable() {
        let overflow = ServiceError::from(transfer_engine::Error::Ledger(
            points_ledger::Error::InvariantViolation("balance counter overflow".to_string()),
        ));
        assert_eq!(overflow.category(), ErrorCategory::Validation);
        assert!(!overflow.is_retryable());
    }

    #[test]
    fn test_body_serializes() {
        let err = ServiceError::from(transfer_engine::Error::NotFound(Uuid::nil()));
        let body = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(body["category"], "not_found");
        assert_eq!(body["retryable"], false);
    }
}
