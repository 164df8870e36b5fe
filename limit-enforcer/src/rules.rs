//! Limit rule configuration
//!
//! Rules are typed and closed: every action is an [`ActionType`] variant and
//! every rule field is named. Unknown keys in configuration are rejected.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Rate-limited user action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Reward for receiving a letter
    ReceiveLetter,
    /// Reward for sending a letter
    SendLetter,
    /// Peer-to-peer transfer creation
    TransferSend,
    /// Shop checkout
    ShopPurchase,
}

impl ActionType {
    /// Every action, in key order
    pub const ALL: [ActionType; 4] = [
        ActionType::ReceiveLetter,
        ActionType::SendLetter,
        ActionType::TransferSend,
        ActionType::ShopPurchase,
    ];

    /// Stable name used in keys, logs and config
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ReceiveLetter => "receive_letter",
            ActionType::SendLetter => "send_letter",
            ActionType::TransferSend => "transfer_send",
            ActionType::ShopPurchase => "shop_purchase",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a cap counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapMeasure {
    /// Number of actions
    #[default]
    Count,
    /// Sum of points moved
    Amount,
}

/// Caps for one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitRule {
    /// Action the rule applies to
    pub action: ActionType,

    /// Whether caps count actions or points
    #[serde(default)]
    pub measure: CapMeasure,

    /// Cap per UTC calendar day
    #[serde(default)]
    pub daily_cap: Option<u64>,

    /// Cap per ISO week
    #[serde(default)]
    pub weekly_cap: Option<u64>,
}

impl LimitRule {
    /// Count-based daily cap
    pub fn daily_count(action: ActionType, cap: u64) -> Self {
        Self {
            action,
            measure: CapMeasure::Count,
            daily_cap: Some(cap),
            weekly_cap: None,
        }
    }

    /// Reject rules whose weekly cap is below their daily cap
    pub fn validate(&self) -> Result<()> {
        if let (Some(daily), Some(weekly)) = (self.daily_cap, self.weekly_cap) {
            if weekly < daily {
                return Err(Error::InvalidRule(format!(
                    "{}: weekly cap {} is below daily cap {}",
                    self.action, weekly, daily
                )));
            }
        }
        Ok(())
    }

    /// Contribution of one action to the counters this rule reads
    pub fn increment(&self, amount: u64) -> u64 {
        match self.measure {
            CapMeasure::Count => 1,
            CapMeasure::Amount => amount,
        }
    }
}

/// `[limits]` configuration section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Rules seeded into the store when it has none for the action
    #[serde(default)]
    pub rules: Vec<LimitRule>,
}

impl LimitsConfig {
    /// Validate every rule and reject duplicate actions
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.action) {
                return Err(Error::InvalidRule(format!(
                    "{} configured more than once",
                    rule.action
                )));
            }
        }
        Ok(())
    }
}
