//! Error types for the limit enforcer

use crate::rules::ActionType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which cap refused the action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Calendar-day cap reached
    DailyCapExceeded,
    /// ISO-week cap reached
    WeeklyCapExceeded,
}

/// Details of a refused action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    /// Action that was refused
    pub action: ActionType,
    /// Cap that was hit
    pub reason: DenyReason,
    /// Configured cap
    pub cap: u64,
    /// Already consumed in the period
    pub used: u64,
    /// Count or amount the action would have added
    pub requested: u64,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let period = match self.reason {
            DenyReason::DailyCapExceeded => "daily",
            DenyReason::WeeklyCapExceeded => "weekly",
        };
        write!(
            f,
            "{} {} cap exceeded: {} used + {} requested > {}",
            self.action, period, self.used, self.requested, self.cap
        )
    }
}

/// Limit enforcer error
#[derive(Debug, Error)]
pub enum Error {
    /// Cap reached
    #[error("Limit exceeded: {0}")]
    Denied(Denial),

    /// Rule rejected by validation
    #[error("Invalid limit rule: {0}")]
    InvalidRule(String),

    /// Ledger failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] points_ledger::Error),
}

impl Error {
    /// Denial details when a cap refused the action
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Error::Denied(denial) => Some(denial),
            _ => None,
        }
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
