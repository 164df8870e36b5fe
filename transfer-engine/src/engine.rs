//! Transfer workflow
//!
//! Lock order is always: transfer lock (held here), then user locks (taken
//! by the ledger inside `post_with`). Nothing takes a transfer lock while
//! holding a user lock.

use crate::{
    config::{FeeDestination, TransferConfig},
    metrics::TransferMetrics,
    store,
    types::{
        Actor, CreateTransfer, Transfer, TransferId, TransferStats, TransferStatus, TransferType,
    },
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use limit_enforcer::{ActionType, LimitEnforcer};
use points_ledger::{Ledger, LockTable, Page, Posting, UserId};
use std::sync::Arc;
use uuid::Uuid;

/// Ways a pending transfer can leave `pending`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Accept,
    Reject,
    Cancel,
    AdminCancel,
    Expire,
}

impl Resolution {
    fn target(&self) -> TransferStatus {
        match self {
            Resolution::Accept => TransferStatus::Processed,
            Resolution::Reject => TransferStatus::Rejected,
            Resolution::Cancel | Resolution::AdminCancel => TransferStatus::Canceled,
            Resolution::Expire => TransferStatus::Expired,
        }
    }
}

/// Transfer workflow engine
#[derive(Debug)]
pub struct TransferEngine {
    ledger: Arc<Ledger>,
    limits: Arc<LimitEnforcer>,
    config: TransferConfig,
    locks: LockTable<TransferId>,
    metrics: Option<TransferMetrics>,
}

impl TransferEngine {
    /// Create engine over the enforcer's ledger
    pub fn new(limits: Arc<LimitEnforcer>, config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ledger: limits.ledger().clone(),
            limits,
            config,
            locks: LockTable::new(),
            metrics: None,
        })
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: TransferMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Ledger used for escrow
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Limit enforcer consulted on create
    pub fn limits(&self) -> &Arc<LimitEnforcer> {
        &self.limits
    }

    /// Active configuration
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub(crate) fn metrics(&self) -> Option<&TransferMetrics> {
        self.metrics.as_ref()
    }

    /// Escrow `amount + fee` from the sender and open a pending transfer.
    ///
    /// Repeating a request with the same `id` and parameters returns the
    /// stored transfer without a second debit.
    pub fn create(&self, request: CreateTransfer) -> Result<Transfer> {
        self.create_typed(request, TransferType::Direct)
    }

    pub(crate) fn create_typed(
        &self,
        request: CreateTransfer,
        transfer_type: TransferType,
    ) -> Result<Transfer> {
        let result = self.try_create(request, transfer_type);
        if let Err(err) = &result {
            self.record_failure("create", err);
        }
        result
    }

    fn try_create(&self, request: CreateTransfer, transfer_type: TransferType) -> Result<Transfer> {
        let CreateTransfer {
            id,
            from_user_id,
            to_user_id,
            amount,
            fee,
            ttl,
        } = request;

        from_user_id.validate()?;
        to_user_id
            .validate()
            .map_err(|e| Error::InvalidRecipient(e.to_string()))?;
        if amount == 0 {
            return Err(Error::InvalidAmount("amount must be positive".to_string()));
        }
        let escrow = amount
            .checked_add(fee)
            .ok_or_else(|| Error::InvalidAmount("amount plus fee overflows".to_string()))?;
        if from_user_id == to_user_id {
            return Err(Error::InvalidRecipient("cannot transfer to yourself".to_string()));
        }
        let ttl = self.effective_ttl(ttl)?;
        let id = id.unwrap_or_else(Uuid::now_v7);

        let _guard = self.locks.lock(&id);

        if let Some(existing) = store::load(self.ledger.storage(), id)? {
            let same = existing.from_user_id == from_user_id
                && existing.to_user_id == to_user_id
                && existing.amount == amount
                && existing.fee == fee
                && existing.transfer_type == transfer_type
                && existing.expires_at - existing.created_at == ttl;
            if same {
                tracing::debug!(transfer_id = %id, "Create replayed, returning stored transfer");
                return Ok(existing);
            }
            return Err(Error::IdempotencyConflict(id));
        }

        if !self.ledger.account_exists(&to_user_id)? {
            return Err(Error::InvalidRecipient(format!("unknown user {}", to_user_id)));
        }

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::InvalidTtl("expiry time out of range".to_string()))?;
        let transfer = Transfer {
            id,
            from_user_id,
            to_user_id,
            amount,
            fee,
            status: TransferStatus::Pending,
            transfer_type,
            created_at: now,
            expires_at,
            resolved_at: None,
        };

        let reference = id.to_string();
        self.ledger.spend_with(
            &transfer.from_user_id,
            escrow,
            "transfer escrow",
            Some(reference.as_str()),
            |ws| {
                self.limits
                    .stage(ws, &transfer.from_user_id, ActionType::TransferSend, amount, now)?;
                store::stage_created(ws, &transfer)?;
                Ok::<(), Error>(())
            },
        )?;

        if let Some(metrics) = &self.metrics {
            metrics.record_outcome("created");
        }
        tracing::info!(
            transfer_id = %transfer.id,
            from = %transfer.from_user_id,
            to = %transfer.to_user_id,
            amount = transfer.amount,
            fee = transfer.fee,
            expires_at = %transfer.expires_at,
            "Transfer created"
        );

        Ok(transfer)
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Result<Duration> {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        if ttl < Duration::zero() {
            return Err(Error::InvalidTtl("ttl must not be negative".to_string()));
        }
        if ttl > self.config.max_ttl() {
            return Err(Error::InvalidTtl(format!(
                "ttl exceeds maximum of {} seconds",
                self.config.max_ttl_secs
            )));
        }
        Ok(ttl)
    }

    /// Recipient accepts: credit the receiver (and the fee account, if any)
    pub fn accept(&self, id: TransferId, actor: &UserId) -> Result<Transfer> {
        self.resolve(id, Resolution::Accept, Some(actor), Utc::now())
    }

    /// Recipient declines: refund `amount + fee` to the sender
    pub fn reject(&self, id: TransferId, actor: &UserId) -> Result<Transfer> {
        self.resolve(id, Resolution::Reject, Some(actor), Utc::now())
    }

    /// Sender withdraws: refund `amount + fee` to the sender
    pub fn cancel(&self, id: TransferId, actor: &UserId) -> Result<Transfer> {
        self.resolve(id, Resolution::Cancel, Some(actor), Utc::now())
    }

    /// Administrative cancel for dispute handling; same refund as `cancel`
    pub fn admin_cancel(&self, id: TransferId) -> Result<Transfer> {
        self.resolve(id, Resolution::AdminCancel, None, Utc::now())
    }

    /// Close an overdue transfer and refund the sender. Used by the scheduler.
    ///
    /// `now` is clamped to the wall clock.
    pub fn expire(&self, id: TransferId, now: DateTime<Utc>) -> Result<Transfer> {
        self.resolve(id, Resolution::Expire, None, now.min(Utc::now()))
    }

    fn resolve(
        &self,
        id: TransferId,
        resolution: Resolution,
        actor: Option<&UserId>,
        now: DateTime<Utc>,
    ) -> Result<Transfer> {
        let result = self.try_resolve(id, resolution, actor, now);
        match &result {
            Ok(transfer) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_outcome(transfer.status.as_str());
                }
            }
            Err(err) => self.record_failure(resolution.target().as_str(), err),
        }
        result
    }

    fn try_resolve(
        &self,
        id: TransferId,
        resolution: Resolution,
        actor: Option<&UserId>,
        now: DateTime<Utc>,
    ) -> Result<Transfer> {
        let _guard = self.locks.lock(&id);

        let transfer = store::load(self.ledger.storage(), id)?.ok_or(Error::NotFound(id))?;

        match resolution {
            Resolution::Accept | Resolution::Reject if actor != Some(&transfer.to_user_id) => {
                return Err(Error::NotRecipient(id));
            }
            Resolution::Cancel if actor != Some(&transfer.from_user_id) => {
                return Err(Error::NotSender(id));
            }
            _ => {}
        }

        match transfer.status {
            TransferStatus::Pending => {}
            TransferStatus::Expired => return Err(Error::Expired(id)),
            status => return Err(Error::AlreadyResolved { id, status }),
        }

        if resolution == Resolution::Expire {
            if !transfer.is_overdue(now) {
                return Err(Error::NotYetDue(id));
            }
        } else if transfer.is_overdue(now) {
            return Err(Error::Expired(id));
        }

        let postings = self.postings_for(&transfer, resolution);

        let mut resolved = transfer;
        resolved.status = resolution.target();
        resolved.resolved_at = Some(now);

        self.ledger.post_with(&postings, |ws| {
            store::stage_resolved(ws, &resolved).map_err(Error::from)
        })?;

        tracing::info!(
            transfer_id = %resolved.id,
            status = %resolved.status,
            from = %resolved.from_user_id,
            to = %resolved.to_user_id,
            amount = resolved.amount,
            "Transfer resolved"
        );

        Ok(resolved)
    }

    fn postings_for(&self, transfer: &Transfer, resolution: Resolution) -> Vec<Posting> {
        let reference = Some(transfer.id.to_string());
        match resolution {
            Resolution::Accept => {
                let mut postings = vec![Posting::earn(
                    transfer.to_user_id.clone(),
                    transfer.amount,
                    "transfer received",
                    reference.clone(),
                )];
                if let FeeDestination::Account(platform) = &self.config.fee_destination {
                    if transfer.fee > 0 {
                        postings.push(Posting::earn(
                            platform.clone(),
                            transfer.fee,
                            "transfer fee",
                            reference,
                        ));
                    }
                }
                postings
            }
            Resolution::Reject | Resolution::Cancel | Resolution::AdminCancel => {
                vec![Posting::earn(
                    transfer.from_user_id.clone(),
                    transfer.escrow(),
                    "transfer refund",
                    reference,
                )]
            }
            Resolution::Expire => vec![Posting::earn(
                transfer.from_user_id.clone(),
                transfer.escrow(),
                "transfer expired",
                reference,
            )],
        }
    }

    /// One transfer, visible to its parties and administrators
    pub fn get(&self, id: TransferId, actor: &Actor) -> Result<Transfer> {
        let transfer = store::load(self.ledger.storage(), id)?.ok_or(Error::NotFound(id))?;
        match actor {
            Actor::User(user_id) if !transfer.involves(user_id) => Err(Error::NotFound(id)),
            _ => Ok(transfer),
        }
    }

    /// Transfers sent or received by a user, newest first
    pub fn list_for_user(
        &self,
        user_id: &UserId,
        status: Option<TransferStatus>,
        page: Page,
    ) -> Result<Vec<Transfer>> {
        page.validate()?;
        let storage = self.ledger.storage();
        let offset = page.offset();
        let limit = page.limit as usize;

        let mut skipped = 0usize;
        let mut transfers = Vec::with_capacity(limit);
        store::visit_user_transfers(storage, user_id, |id| {
            let Some(transfer) = store::load(storage, id)? else {
                return Ok(true);
            };
            if status.is_some_and(|s| s != transfer.status) {
                return Ok(true);
            }
            if skipped < offset {
                skipped += 1;
                return Ok(true);
            }
            transfers.push(transfer);
            Ok(transfers.len() < limit)
        })?;
        Ok(transfers)
    }

    /// Sent/received counts and sums for a user
    pub fn stats(&self, user_id: &UserId) -> Result<TransferStats> {
        let storage = self.ledger.storage();
        let mut stats = TransferStats::new(user_id.clone());
        store::visit_user_transfers(storage, user_id, |id| {
            if let Some(transfer) = store::load(storage, id)? {
                stats.record(&transfer);
            }
            Ok(true)
        })?;
        Ok(stats)
    }

    fn record_failure(&self, operation: &str, err: &Error) {
        let reason = match err {
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::LimitExceeded(_) => "limit_exceeded",
            Error::AlreadyResolved { .. } => "already_resolved",
            Error::Expired(_) => "expired",
            Error::NotSender(_) | Error::NotRecipient(_) => "unauthorized",
            Error::NotFound(_) => "not_found",
            Error::IdempotencyConflict(_) => "conflict",
            Error::Ledger(_) => "storage",
            _ => "invalid",
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_failure(reason);
        }
        tracing::debug!(operation, reason, error = %err, "Transfer call refused");
    }
}
