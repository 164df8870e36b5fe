//! Configuration for the transfer engine and expiration scheduler

use crate::{Error, Result};
use chrono::Duration;
use points_ledger::UserId;
use serde::{Deserialize, Serialize};

/// Ceiling for any configured TTL (ten years, in seconds)
pub const MAX_TTL_CEILING_SECS: u64 = 10 * 365 * 24 * 3600;

/// Where the fee of an accepted transfer goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeeDestination {
    /// Fee leaves circulation
    #[default]
    Burn,
    /// Fee is credited to a platform account
    Account(UserId),
}

/// `[transfers]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferConfig {
    /// TTL applied when the caller gives none (seconds)
    pub default_ttl_secs: u64,

    /// Largest accepted TTL (seconds)
    pub max_ttl_secs: u64,

    /// Fee routing on accept
    pub fee_destination: FeeDestination,

    /// Recipient cap for one batch request
    pub max_batch_recipients: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 72 * 3600,     // 3 days
            max_ttl_secs: 30 * 24 * 3600,    // 30 days
            fee_destination: FeeDestination::Burn,
            max_batch_recipients: 50,
        }
    }
}

impl TransferConfig {
    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.max_ttl_secs > MAX_TTL_CEILING_SECS {
            return Err(Error::Config(format!(
                "max_ttl_secs {} exceeds ceiling {}",
                self.max_ttl_secs, MAX_TTL_CEILING_SECS
            )));
        }
        if self.default_ttl_secs > self.max_ttl_secs {
            return Err(Error::Config(format!(
                "default_ttl_secs {} exceeds max_ttl_secs {}",
                self.default_ttl_secs, self.max_ttl_secs
            )));
        }
        if self.max_batch_recipients == 0 {
            return Err(Error::Config("max_batch_recipients must be positive".to_string()));
        }
        if let FeeDestination::Account(user_id) = &self.fee_destination {
            user_id
                .validate()
                .map_err(|e| Error::Config(format!("fee account: {}", e)))?;
        }
        Ok(())
    }

    /// Default TTL as a duration, clamped to the ceiling
    pub fn default_ttl(&self) -> Duration {
        Duration::seconds(self.default_ttl_secs.min(MAX_TTL_CEILING_SECS) as i64)
    }

    /// Maximum TTL as a duration, clamped to the ceiling
    pub fn max_ttl(&self) -> Duration {
        Duration::seconds(self.max_ttl_secs.min(MAX_TTL_CEILING_SECS) as i64)
    }
}

/// `[scheduler]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Run the periodic sweep
    pub enabled: bool,

    /// Seconds between sweeps
    pub interval_secs: u64,

    /// Due transfers read per scan page
    pub scan_page_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600, // hourly
            scan_page_size: 500,
        }
    }
}

impl SchedulerConfig {
    /// Reject zero interval or page size
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::Config("interval_secs must be positive".to_string()));
        }
        if self.scan_page_size == 0 {
            return Err(Error::Config("scan_page_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Sweep interval
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }
}
