//! Transfer Workflow Engine
//!
//! Peer-to-peer point transfers between pen pals, built on the ledger.
//!
//! # Lifecycle
//!
//! ```text
//!           create()                accept()
//!  (none) ────────────► pending ──────────────► processed
//!                          │  │
//!                 cancel() │  │ reject()
//!                          ▼  ▼
//!                      canceled  rejected
//!
//!            scheduler (expires_at elapsed) ──► expired
//! ```
//!
//! Creation debits `amount + fee` from the sender into escrow. Every
//! resolution commits its status change together with the matching credit
//! or refund in one atomic unit, under a per-transfer lock, so a transfer
//! leaves `pending` exactly once.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use limit_enforcer::{LimitEnforcer, LimitsConfig};
//! use points_ledger::{Ledger, UserId};
//! use transfer_engine::{Actor, CreateTransfer, TransferConfig, TransferEngine};
//!
//! fn main() -> transfer_engine::Result<()> {
//!     let ledger = Arc::new(Ledger::open(&points_ledger::Config::default())?);
//!     let limits = Arc::new(LimitEnforcer::open(ledger, &LimitsConfig::default())?);
//!     let engine = TransferEngine::new(limits, TransferConfig::default())?;
//!
//!     let alice = UserId::new("alice");
//!     let bob = UserId::new("bob");
//!     let transfer = engine.create(CreateTransfer::new(alice, bob.clone(), 30).with_fee(2))?;
//!     engine.accept(transfer.id, &bob)?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod store;
pub mod types;

// Re-exports
pub use batch::{BatchOutcome, BatchRecipient, BatchResult, FeePolicy};
pub use config::{FeeDestination, SchedulerConfig, TransferConfig};
pub use engine::TransferEngine;
pub use error::{Error, Result};
pub use metrics::TransferMetrics;
pub use scheduler::{
    BatchStatus, BatchTrigger, ExpirationBatch, ExpirationScheduler, SchedulerHandle,
};
pub use types::{
    Actor, CreateTransfer, StatusCounts, Transfer, TransferId, TransferStats, TransferStatus,
    TransferType,
};
