//! Limit Enforcer
//!
//! Per-action daily and weekly caps for rate-limited user actions
//! (letter rewards, transfers, shop purchases).
//!
//! Enforced mutations evaluate the cap and bump the period counters inside
//! the ledger's atomic unit, under the user's ledger lock, so two racing
//! requests cannot both slip under the same cap. [`LimitEnforcer::check`]
//! is a read-only pre-flight for callers that only want to ask.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod enforcer;
pub mod error;
pub mod rules;
pub mod usage;

pub use enforcer::{Decision, LimitEnforcer};
pub use error::{Denial, DenyReason, Error, Result};
pub use rules::{ActionType, CapMeasure, LimitRule, LimitsConfig};
pub use usage::{Period, Usage, UsageCounter};
