//! Transfer and expiration metrics
//!
//! # Metrics
//!
//! - `points_transfers_total{outcome}` - Transfers created and resolved
//! - `points_transfer_failures_total{reason}` - Refused create/resolve calls
//! - `points_expiration_runs_total{status}` - Scheduler batches by final status
//! - `points_expiration_errors_total` - Per-transfer failures inside batches

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Metrics collector
#[derive(Clone, Debug)]
pub struct TransferMetrics {
    /// Transfers by outcome (`created`, then one terminal status each)
    pub transfers_total: IntCounterVec,

    /// Refused calls by reason
    pub failures_total: IntCounterVec,

    /// Expiration batches by final status
    pub expiration_runs_total: IntCounterVec,

    /// Per-transfer failures during expiration batches
    pub expiration_errors_total: IntCounter,
}

impl TransferMetrics {
    /// Create and register on `registry`
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let transfers_total = IntCounterVec::new(
            Opts::new("points_transfers_total", "Transfers created and resolved"),
            &["outcome"],
        )?;
        registry.register(Box::new(transfers_total.clone()))?;

        let failures_total = IntCounterVec::new(
            Opts::new("points_transfer_failures_total", "Refused transfer calls"),
            &["reason"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let expiration_runs_total = IntCounterVec::new(
            Opts::new("points_expiration_runs_total", "Expiration batches by final status"),
            &["status"],
        )?;
        registry.register(Box::new(expiration_runs_total.clone()))?;

        let expiration_errors_total = IntCounter::new(
            "points_expiration_errors_total",
            "Per-transfer failures during expiration batches",
        )?;
        registry.register(Box::new(expiration_errors_total.clone()))?;

        Ok(Self {
            transfers_total,
            failures_total,
            expiration_runs_total,
            expiration_errors_total,
        })
    }

    /// Record a transfer creation or resolution
    pub fn record_outcome(&self, outcome: &str) {
        self.transfers_total.with_label_values(&[outcome]).inc();
    }

    /// Record a refused call
    pub fn record_failure(&self, reason: &str) {
        self.failures_total.with_label_values(&[reason]).inc();
    }

    /// Record a finished expiration batch
    pub fn record_run(&self, status: &str, errors: u64) {
        self.expiration_runs_total.with_label_values(&[status]).inc();
        self.expiration_errors_total.inc_by(errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let registry = Registry::new();
        let metrics = TransferMetrics::new(&registry).unwrap();

        metrics.record_outcome("created");
        metrics.record_outcome("created");
        metrics.record_outcome("processed");
        metrics.record_run("completed", 2);

        assert_eq!(metrics.transfers_total.with_label_values(&["created"]).get(), 2);
        assert_eq!(metrics.expiration_errors_total.get(), 2);
        assert_eq!(
            metrics
                .expiration_runs_total
                .with_label_values(&["completed"])
                .get(),
            1
        );
    }
}
