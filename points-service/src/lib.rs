//! Points service
//!
//! Exposes the points ledger and peer-to-peer transfers as one async API:
//!
//! - Balances, history and the leaderboard
//! - Rate-limited earning and spending for platform activities
//! - Escrowed transfers (create, accept, reject, cancel, batch)
//! - Administrative credits, debits, cancels and forced expiration sweeps
//! - Prometheus metrics in text exposition format
//!
//! Errors carry an [`ErrorCategory`] so callers can tell "not enough points"
//! apart from "try again later".

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod service;

pub use config::{LoggingConfig, ServiceConfig};
pub use error::{ErrorBody, ErrorCategory, Result, ServiceError};
pub use service::PointsService;
