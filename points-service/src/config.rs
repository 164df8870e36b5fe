//! Service configuration
//!
//! One TOML file with a section per component:
//!
//! ```toml
//! [ledger]
//! data_dir = "/var/lib/points"
//!
//! [transfers]
//! default_ttl_secs = 259200
//! fee_destination = "burn"
//!
//! [scheduler]
//! interval_secs = 3600
//!
//! [[limits.rules]]
//! action = "receive_letter"
//! daily_cap = 5
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use crate::error::{Result, ServiceError};
use limit_enforcer::LimitsConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use transfer_engine::{SchedulerConfig, TransferConfig};

/// Log output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Full service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Ledger store
    pub ledger: points_ledger::Config,

    /// Transfer workflow
    pub transfers: TransferConfig,

    /// Expiration scheduler
    pub scheduler: SchedulerConfig,

    /// Limit rules seeded on first start
    pub limits: LimitsConfig,

    /// Logging
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ServiceConfig = toml::from_str(content)
            .map_err(|e| ServiceError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// File named by `POINTS_CONFIG` (or defaults), then environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("POINTS_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(data_dir) = var("POINTS_DATA_DIR") {
            self.ledger.data_dir = PathBuf::from(data_dir);
        }

        if let Some(sync) = var("POINTS_SYNC_WRITES") {
            self.ledger.sync_writes = parse_env("POINTS_SYNC_WRITES", &sync)?;
        }

        if let Some(level) = var("POINTS_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(json) = var("POINTS_LOG_JSON") {
            self.logging.json = parse_env("POINTS_LOG_JSON", &json)?;
        }

        if let Some(secs) = var("POINTS_EXPIRY_INTERVAL_SECS") {
            self.scheduler.interval_secs = parse_env("POINTS_EXPIRY_INTERVAL_SECS", &secs)?;
        }

        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.transfers.validate()?;
        self.scheduler.validate()?;
        self.limits.validate()?;
        if self.logging.level.trim().is_empty() {
            return Err(ServiceError::Config("logging.level must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ServiceError::Config(format!("{}: cannot parse {:?}", name, value)))
}
