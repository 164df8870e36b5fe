//! Points Ledger
//!
//! Durable per-user points balances with an append-only entry log.
//!
//! # Architecture
//!
//! - **Ledger of record**: `balances` + `entries` column families in RocksDB
//! - **Atomic units**: every balance change and its entry commit in one `WriteBatch`
//! - **Per-user serialization**: a lock table keyed by user, no global writer
//! - **Read-through cache**: balances cached in memory, invalidated on every write
//!
//! # Invariants
//!
//! - `total == available + used` after every posting
//! - Replaying a user's entries (earn +, spend -) reconstructs `available`
//! - Entries are never modified or deleted
//! - `available` never goes below zero

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod cache;
pub mod config;
pub mod error;
pub mod ledger;
pub mod level;
pub mod locks;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use cache::BalanceCache;
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{LeaderboardEntry, Ledger, Reconciliation};
pub use locks::{KeyGuard, LockTable};
pub use metrics::LedgerMetrics;
pub use storage::{keys, Storage, Table, WriteSet};
pub use types::{Direction, LedgerEntry, Page, Posting, UserBalance, UserId};
