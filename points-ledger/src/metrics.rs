//! Metrics collection for observability
//!
//! Prometheus metrics for the ledger, registered on a caller-supplied
//! registry so several ledgers (tests, tools) can coexist in one process.
//!
//! # Metrics
//!
//! - `points_ledger_entries_total{direction}` - Entries committed
//! - `points_ledger_points_total{direction}` - Points moved
//! - `points_ledger_insufficient_balance_total` - Spends refused
//! - `points_ledger_commit_duration_seconds` - Histogram of commit latencies
//! - `points_ledger_cache_hits_total` - Balance reads served from cache
//! - `points_ledger_cache_misses_total` - Balance reads that went to the store
//! - `points_ledger_cache_invalidations_total` - Cached balances dropped after a commit

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

use crate::types::Direction;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct LedgerMetrics {
    /// Entries committed by direction
    pub entries_total: IntCounterVec,

    /// Points moved by direction
    pub points_total: IntCounterVec,

    /// Spends refused for insufficient balance
    pub insufficient_balance_total: IntCounter,

    /// Commit latency
    pub commit_duration: Histogram,

    /// Balance cache hits
    pub cache_hits_total: IntCounter,

    /// Balance cache misses
    pub cache_misses_total: IntCounter,

    /// Cached balances dropped after a commit
    pub cache_invalidations_total: IntCounter,
}

impl LedgerMetrics {
    /// Create and register on `registry`
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let entries_total = IntCounterVec::new(
            Opts::new("points_ledger_entries_total", "Ledger entries committed"),
            &["direction"],
        )?;
        registry.register(Box::new(entries_total.clone()))?;

        let points_total = IntCounterVec::new(
            Opts::new("points_ledger_points_total", "Points moved through the ledger"),
            &["direction"],
        )?;
        registry.register(Box::new(points_total.clone()))?;

        let insufficient_balance_total = IntCounter::new(
            "points_ledger_insufficient_balance_total",
            "Spends refused for insufficient balance",
        )?;
        registry.register(Box::new(insufficient_balance_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "points_ledger_commit_duration_seconds",
                "Histogram of ledger commit latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        let cache_hits_total =
            IntCounter::new("points_ledger_cache_hits_total", "Balance reads served from cache")?;
        registry.register(Box::new(cache_hits_total.clone()))?;

        let cache_misses_total = IntCounter::new(
            "points_ledger_cache_misses_total",
            "Balance reads that went to the store",
        )?;
        registry.register(Box::new(cache_misses_total.clone()))?;

        let cache_invalidations_total = IntCounter::new(
            "points_ledger_cache_invalidations_total",
            "Cached balances dropped after a commit",
        )?;
        registry.register(Box::new(cache_invalidations_total.clone()))?;

        Ok(Self {
            entries_total,
            points_total,
            insufficient_balance_total,
            commit_duration,
            cache_hits_total,
            cache_misses_total,
            cache_invalidations_total,
        })
    }

    /// Record a committed entry
    pub fn record_entry(&self, direction: Direction, amount: u64) {
        self.entries_total
            .with_label_values(&[direction.as_str()])
            .inc();
        self.points_total
            .with_label_values(&[direction.as_str()])
            .inc_by(amount);
    }

    /// Record a refused spend
    pub fn record_insufficient_balance(&self) {
        self.insufficient_balance_total.inc();
    }

    /// Record a balance cache lookup
    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits_total.inc();
        } else {
            self.cache_misses_total.inc();
        }
    }

    /// Record a dropped cache entry
    pub fn record_cache_invalidation(&self) {
        self.cache_invalidations_total.inc();
    }

    /// Record commit duration
    pub fn record_commit_duration(&self, duration_seconds: f64) {
        self.commit_duration.observe(duration_seconds);
    }
}
