//! Async façade over the ledger, limits, transfers and scheduler
//!
//! Every call runs the synchronous core on tokio's blocking pool, so RocksDB
//! I/O and lock waits never stall the async workers. The caller supplies an
//! already-authenticated user id; admin operations bypass limit checks and
//! must only be reachable from privileged callers.

use crate::{
    config::ServiceConfig,
    error::{Result, ServiceError},
};
use chrono::{Duration, Utc};
use limit_enforcer::{ActionType, LimitEnforcer, LimitRule, Usage};
use points_ledger::{
    LeaderboardEntry, Ledger, LedgerEntry, LedgerMetrics, Page, Reconciliation, UserBalance, UserId,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tokio::task::JoinHandle;
use transfer_engine::{
    Actor, BatchRecipient, BatchResult, BatchTrigger, CreateTransfer, ExpirationBatch,
    ExpirationScheduler, FeePolicy, SchedulerHandle, Transfer, TransferEngine, TransferId,
    TransferMetrics, TransferStats, TransferStatus,
};

/// Points service
#[derive(Debug, Clone)]
pub struct PointsService {
    engine: Arc<TransferEngine>,
    scheduler: Arc<ExpirationScheduler>,
    registry: Registry,
}

impl PointsService {
    /// Open the store, seed limit rules and recover interrupted batches
    pub fn open(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;
        let registry = Registry::new();

        let ledger = Ledger::open(&config.ledger)?.with_metrics(LedgerMetrics::new(&registry)?);
        let limits = LimitEnforcer::open(Arc::new(ledger), &config.limits)?;
        let engine = TransferEngine::new(Arc::new(limits), config.transfers.clone())?
            .with_metrics(TransferMetrics::new(&registry)?);
        let engine = Arc::new(engine);

        let scheduler = ExpirationScheduler::new(engine.clone(), config.scheduler.clone())?;
        let recovered = scheduler.recover_interrupted()?;

        tracing::info!(
            data_dir = %config.ledger.data_dir.display(),
            recovered_batches = recovered,
            "Points service opened"
        );

        Ok(Self {
            engine,
            scheduler: Arc::new(scheduler),
            registry,
        })
    }

    /// Spawn the periodic expiration loop on the current runtime
    pub fn start_scheduler(&self) -> (SchedulerHandle, JoinHandle<()>) {
        self.scheduler.clone().spawn()
    }

    /// Underlying engine
    pub fn engine(&self) -> &Arc<TransferEngine> {
        &self.engine
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&TransferEngine) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || op(&engine))
            .await
            .map_err(|e| ServiceError::Task(e.to_string()))?
    }

    // Balances

    /// Current balance
    pub async fn get_balance(&self, user_id: UserId) -> Result<UserBalance> {
        self.blocking(move |engine| Ok(engine.ledger().balance(&user_id)?))
            .await
    }

    /// Ledger entries, newest first
    pub async fn get_history(&self, user_id: UserId, page: Page) -> Result<Vec<LedgerEntry>> {
        self.blocking(move |engine| Ok(engine.ledger().history(&user_id, page)?))
            .await
    }

    /// Ranking by lifetime points
    pub async fn get_leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        self.blocking(move |engine| Ok(engine.ledger().leaderboard(limit)?))
            .await
    }

    /// Reward a rate-limited activity, such as receiving a letter
    pub async fn earn_for_action(
        &self,
        user_id: UserId,
        action: ActionType,
        amount: u64,
        description: String,
        reference: Option<String>,
    ) -> Result<LedgerEntry> {
        self.blocking(move |engine| {
            Ok(engine.limits().earn(
                &user_id,
                action,
                amount,
                &description,
                reference.as_deref(),
            )?)
        })
        .await
    }

    /// Charge for a rate-limited activity, such as a shop purchase
    pub async fn spend_for_action(
        &self,
        user_id: UserId,
        action: ActionType,
        amount: u64,
        description: String,
        reference: Option<String>,
    ) -> Result<LedgerEntry> {
        self.blocking(move |engine| {
            Ok(engine.limits().spend(
                &user_id,
                action,
                amount,
                &description,
                reference.as_deref(),
            )?)
        })
        .await
    }

    /// Consumption against the caps for one action
    pub async fn get_usage(&self, user_id: UserId, action: ActionType) -> Result<Usage> {
        self.blocking(move |engine| Ok(engine.limits().usage(&user_id, action, Utc::now())?))
            .await
    }

    // Transfers

    /// Escrow and open a transfer
    pub async fn create_transfer(&self, request: CreateTransfer) -> Result<Transfer> {
        self.blocking(move |engine| Ok(engine.create(request)?))
            .await
    }

    /// Open one transfer per recipient
    pub async fn create_batch_transfer(
        &self,
        from_user_id: UserId,
        recipients: Vec<BatchRecipient>,
        fee_policy: FeePolicy,
        ttl: Option<Duration>,
    ) -> Result<BatchResult> {
        self.blocking(move |engine| {
            Ok(engine.batch_create(&from_user_id, &recipients, fee_policy, ttl)?)
        })
        .await
    }

    /// Recipient accepts
    pub async fn accept_transfer(&self, id: TransferId, user_id: UserId) -> Result<Transfer> {
        self.blocking(move |engine| Ok(engine.accept(id, &user_id)?))
            .await
    }

    /// Recipient rejects
    pub async fn reject_transfer(&self, id: TransferId, user_id: UserId) -> Result<Transfer> {
        self.blocking(move |engine| Ok(engine.reject(id, &user_id)?))
            .await
    }

    /// Sender cancels
    pub async fn cancel_transfer(&self, id: TransferId, user_id: UserId) -> Result<Transfer> {
        self.blocking(move |engine| Ok(engine.cancel(id, &user_id)?))
            .await
    }

    /// One transfer
    pub async fn get_transfer(&self, id: TransferId, actor: Actor) -> Result<Transfer> {
        self.blocking(move |engine| Ok(engine.get(id, &actor)?))
            .await
    }

    /// A user's transfers, newest first
    pub async fn list_transfers(
        &self,
        user_id: UserId,
        status: Option<TransferStatus>,
        page: Page,
    ) -> Result<Vec<Transfer>> {
        self.blocking(move |engine| Ok(engine.list_for_user(&user_id, status, page)?))
            .await
    }

    /// Sent/received statistics
    pub async fn get_transfer_stats(&self, user_id: UserId) -> Result<TransferStats> {
        self.blocking(move |engine| Ok(engine.stats(&user_id)?))
            .await
    }

    // Administration

    /// Credit without limit checks
    pub async fn admin_add_points(
        &self,
        user_id: UserId,
        amount: u64,
        description: String,
    ) -> Result<LedgerEntry> {
        tracing::info!(user_id = %user_id, amount, "Admin credit");
        self.blocking(move |engine| Ok(engine.ledger().earn(&user_id, amount, &description, None)?))
            .await
    }

    /// Debit without limit checks; never overdraws
    pub async fn admin_spend_points(
        &self,
        user_id: UserId,
        amount: u64,
        description: String,
    ) -> Result<LedgerEntry> {
        tracing::info!(user_id = %user_id, amount, "Admin debit");
        self.blocking(move |engine| Ok(engine.ledger().spend(&user_id, amount, &description, None)?))
            .await
    }

    /// Force a pending transfer closed with a refund
    pub async fn admin_cancel_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.blocking(move |engine| Ok(engine.admin_cancel(id)?))
            .await
    }

    /// Run an expiration batch now
    pub async fn admin_force_expire(&self) -> Result<ExpirationBatch> {
        let scheduler = self.scheduler.clone();
        tokio::task::spawn_blocking(move || scheduler.run_once(BatchTrigger::Manual))
            .await
            .map_err(|e| ServiceError::Task(e.to_string()))?
            .map_err(ServiceError::from)
    }

    /// Recent expiration batches, newest first
    pub async fn expiration_batches(&self, limit: usize) -> Result<Vec<ExpirationBatch>> {
        let scheduler = self.scheduler.clone();
        tokio::task::spawn_blocking(move || scheduler.recent_batches(limit))
            .await
            .map_err(|e| ServiceError::Task(e.to_string()))?
            .map_err(ServiceError::from)
    }

    /// Replace or add a limit rule
    pub async fn set_limit_rule(&self, rule: LimitRule) -> Result<()> {
        self.blocking(move |engine| Ok(engine.limits().set_rule(rule)?))
            .await
    }

    /// Active limit rules
    pub fn limit_rules(&self) -> Vec<LimitRule> {
        self.engine.limits().rules()
    }

    /// Replay a user's entries against the stored balance
    pub async fn reconcile(&self, user_id: UserId) -> Result<Reconciliation> {
        self.blocking(move |engine| Ok(engine.ledger().reconcile(&user_id)?))
            .await
    }

    /// Prometheus text exposition of every service metric
    pub fn render_metrics(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ServiceError::Task(e.to_string()))
    }
}
