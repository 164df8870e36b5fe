//! Expiration scheduler
//!
//! Sweeps transfers whose deadline has passed and expires them, one atomic
//! unit per transfer. Runs on a fixed interval and on demand.
//!
//! - Each run is recorded as an [`ExpirationBatch`]
//!   (pending -> processing -> completed | failed)
//! - At most one batch is processing at a time in this process
//! - Batches left `processing` by a crash are marked failed on startup
//! - A transfer already resolved is skipped, so overlapping or repeated runs
//!   never refund twice

use crate::{
    config::SchedulerConfig, engine::TransferEngine, store, types::TransferId, Error, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use points_ledger::{storage, Table};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Batch status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Recorded, not started
    Pending,
    /// Sweeping
    Processing,
    /// Sweep finished
    Completed,
    /// Sweep aborted or interrupted
    Failed,
}

impl BatchStatus {
    /// Lowercase label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    fn can_become(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Pending, BatchStatus::Processing)
                | (BatchStatus::Pending, BatchStatus::Failed)
                | (BatchStatus::Processing, BatchStatus::Completed)
                | (BatchStatus::Processing, BatchStatus::Failed)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchTrigger {
    /// Interval timer
    Scheduled,
    /// Administrative trigger
    Manual,
}

/// Bookkeeping for one scheduler run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationBatch {
    /// Batch ID (UUIDv7, so batch keys sort by creation)
    pub id: Uuid,
    /// Current status
    pub status: BatchStatus,
    /// What started the run
    pub trigger: BatchTrigger,
    /// Transfers with `expires_at` before this instant were due
    pub cutoff: DateTime<Utc>,
    /// Due rows examined
    pub scanned_count: u64,
    /// Transfers moved to `expired`
    pub expired_count: u64,
    /// Rows whose transfer had already been resolved
    pub skipped_count: u64,
    /// Transfers that failed and will be retried on the next run
    pub error_count: u64,
    /// When the sweep started
    pub started_at: Option<DateTime<Utc>>,
    /// When the batch reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure description for `failed` batches
    pub failure: Option<String>,
}

impl ExpirationBatch {
    fn new(trigger: BatchTrigger, cutoff: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            status: BatchStatus::Pending,
            trigger,
            cutoff,
            scanned_count: 0,
            expired_count: 0,
            skipped_count: 0,
            error_count: 0,
            started_at: None,
            completed_at: None,
            failure: None,
        }
    }

    fn transition(&mut self, next: BatchStatus) -> Result<()> {
        if !self.status.can_become(next) {
            return Err(Error::Scheduler(format!(
                "batch {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let now = Utc::now();
        match next {
            BatchStatus::Processing => self.started_at = Some(now),
            BatchStatus::Completed | BatchStatus::Failed => self.completed_at = Some(now),
            BatchStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }
}

enum Command {
    RunNow {
        respond: oneshot::Sender<Result<ExpirationBatch>>,
    },
    Shutdown,
}

/// Cloneable handle to a spawned scheduler task
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::RunNow { .. } => f.write_str("RunNow"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl SchedulerHandle {
    /// Run a batch now and wait for it
    pub async fn run_now(&self) -> Result<ExpirationBatch> {
        let (respond, response) = oneshot::channel();
        self.commands
            .send(Command::RunNow { respond })
            .await
            .map_err(|_| Error::Scheduler("scheduler task has stopped".to_string()))?;
        response
            .await
            .map_err(|_| Error::Scheduler("scheduler task dropped the request".to_string()))?
    }

    /// Stop the task after any batch in flight
    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| Error::Scheduler("scheduler task has stopped".to_string()))
    }
}

/// Expiration scheduler
#[derive(Debug)]
pub struct ExpirationScheduler {
    engine: Arc<TransferEngine>,
    config: SchedulerConfig,
    running: Mutex<()>,
}

impl ExpirationScheduler {
    /// Create scheduler
    pub fn new(engine: Arc<TransferEngine>, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            config,
            running: Mutex::new(()),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Mark batches left open by a previous process as failed.
    ///
    /// Refused with `BatchInProgress` while a sweep is running here.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let Some(_running) = self.running.try_lock() else {
            return Err(Error::BatchInProgress);
        };
        let db = self.engine.ledger().storage();

        let mut open = Vec::new();
        db.visit_prefix(Table::ExpirationBatches, &[], false, |_, value| {
            let batch: ExpirationBatch = storage::decode(value)?;
            if matches!(batch.status, BatchStatus::Pending | BatchStatus::Processing) {
                open.push(batch);
            }
            Ok(true)
        })?;

        for batch in &mut open {
            batch.failure = Some("interrupted before completion".to_string());
            batch.transition(BatchStatus::Failed)?;
            self.save(batch)?;
            warn!(batch_id = %batch.id, "Marked interrupted expiration batch as failed");
        }
        Ok(open.len())
    }

    /// Run one batch against the current time
    pub fn run_once(&self, trigger: BatchTrigger) -> Result<ExpirationBatch> {
        self.run_once_at(Utc::now(), trigger)
    }

    /// Run one batch, expiring transfers with `expires_at < now`.
    ///
    /// A cutoff later than the wall clock is clamped to it, so no transfer
    /// expires before its deadline.
    pub fn run_once_at(&self, now: DateTime<Utc>, trigger: BatchTrigger) -> Result<ExpirationBatch> {
        let Some(_running) = self.running.try_lock() else {
            return Err(Error::BatchInProgress);
        };
        let now = now.min(Utc::now());

        let mut batch = ExpirationBatch::new(trigger, now);
        self.save(&batch)?;
        batch.transition(BatchStatus::Processing)?;
        self.save(&batch)?;

        info!(batch_id = %batch.id, trigger = ?trigger, cutoff = %now, "Expiration batch started");

        match self.sweep(&mut batch, now) {
            Ok(()) => {
                batch.transition(BatchStatus::Completed)?;
                info!(
                    batch_id = %batch.id,
                    scanned = batch.scanned_count,
                    expired = batch.expired_count,
                    skipped = batch.skipped_count,
                    errors = batch.error_count,
                    "Expiration batch completed"
                );
            }
            Err(err) => {
                batch.failure = Some(err.to_string());
                batch.transition(BatchStatus::Failed)?;
                error!(
                    batch_id = %batch.id,
                    expired = batch.expired_count,
                    error = %err,
                    "Expiration batch failed"
                );
            }
        }
        self.save(&batch)?;

        if let Some(metrics) = self.engine.metrics() {
            metrics.record_run(batch.status.as_str(), batch.error_count);
        }
        Ok(batch)
    }

    fn sweep(&self, batch: &mut ExpirationBatch, now: DateTime<Utc>) -> Result<()> {
        let db = self.engine.ledger().storage();
        let page_size = self.config.scan_page_size;
        let mut cursor: Vec<u8> = Vec::new();

        loop {
            let keys = store::due_keys(db, &cursor, now, page_size)?;

            for key in &keys {
                batch.scanned_count += 1;
                let Some(id) = store::id_from_key(key) else {
                    batch.error_count += 1;
                    warn!(key_len = key.len(), "Malformed expiry key");
                    continue;
                };
                self.expire_one(batch, id, now)?;
            }

            match keys.last() {
                Some(last) if keys.len() == page_size => {
                    cursor = last.clone();
                    cursor.push(0);
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn expire_one(&self, batch: &mut ExpirationBatch, id: TransferId, now: DateTime<Utc>) -> Result<()> {
        match self.engine.expire(id, now) {
            Ok(_) => batch.expired_count += 1,
            Err(Error::AlreadyResolved { .. }) | Err(Error::Expired(_)) | Err(Error::NotFound(_)) => {
                batch.skipped_count += 1;
                debug!(transfer_id = %id, "Transfer already resolved, skipping");
            }
            Err(err) if err.is_storage_failure() => return Err(err),
            Err(err) => {
                batch.error_count += 1;
                warn!(transfer_id = %id, error = %err, "Failed to expire transfer, will retry");
            }
        }
        Ok(())
    }

    fn save(&self, batch: &ExpirationBatch) -> Result<()> {
        let db = self.engine.ledger().storage();
        let mut ws = db.write_set();
        ws.put(Table::ExpirationBatches, batch.id.as_bytes(), batch)?;
        db.commit(ws)?;
        Ok(())
    }

    /// One recorded batch
    pub fn batch(&self, id: Uuid) -> Result<Option<ExpirationBatch>> {
        Ok(self
            .engine
            .ledger()
            .storage()
            .get(Table::ExpirationBatches, id.as_bytes())?)
    }

    /// Most recent batches, newest first
    pub fn recent_batches(&self, limit: usize) -> Result<Vec<ExpirationBatch>> {
        let mut batches = Vec::with_capacity(limit.min(64));
        if limit == 0 {
            return Ok(batches);
        }
        self.engine.ledger().storage().visit_prefix(
            Table::ExpirationBatches,
            &[],
            true,
            |_, value| {
                batches.push(storage::decode(value)?);
                Ok(batches.len() < limit)
            },
        )?;
        Ok(batches)
    }

    /// Start the periodic loop on the current tokio runtime.
    ///
    /// When `enabled` is false the task only serves `run_now` requests.
    pub fn spawn(self: Arc<Self>) -> (SchedulerHandle, JoinHandle<()>) {
        let (commands, mailbox) = mpsc::channel(16);
        let task = tokio::spawn(self.run_loop(mailbox));
        (SchedulerHandle { commands }, task)
    }

    async fn run_loop(self: Arc<Self>, mut mailbox: mpsc::Receiver<Command>) {
        let periodic = self.config.enabled;
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            periodic,
            interval_secs = self.config.interval_secs,
            "Expiration scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick(), if periodic => {
                    match self.clone().run_blocking(BatchTrigger::Scheduled).await {
                        Ok(batch) => debug!(batch_id = %batch.id, status = %batch.status, "Scheduled sweep finished"),
                        Err(Error::BatchInProgress) => debug!("Sweep skipped, another batch is running"),
                        Err(err) => warn!(error = %err, "Scheduled sweep failed"),
                    }
                }
                command = mailbox.recv() => match command {
                    Some(Command::RunNow { respond }) => {
                        let result = self.clone().run_blocking(BatchTrigger::Manual).await;
                        let _ = respond.send(result);
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        info!("Expiration scheduler stopped");
    }

    async fn run_blocking(self: Arc<Self>, trigger: BatchTrigger) -> Result<ExpirationBatch> {
        tokio::task::spawn_blocking(move || self.run_once(trigger))
            .await
            .map_err(|e| Error::Scheduler(format!("sweep task panicked: {}", e)))?
    }
}
