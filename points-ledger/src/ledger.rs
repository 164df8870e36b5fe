//! Ledger Store
//!
//! The only writer of balances and entries. Every call to [`Ledger::post_with`]
//! (and the `earn`/`spend` wrappers around it) is one atomic unit:
//!
//! 1. lock every touched user, in key order
//! 2. load balances from the store
//! 3. apply postings, producing one entry each
//! 4. let the caller stage its own writes (transfer state, usage counters)
//! 5. commit everything in one `WriteBatch`
//! 6. invalidate cached balances, then release the locks
//!
//! # Example
//!
//! ```no_run
//! use points_ledger::{Config, Ledger, UserId};
//!
//! fn main() -> points_ledger::Result<()> {
//!     let ledger = Ledger::open(&Config::default())?;
//!     let alice = UserId::new("alice");
//!
//!     ledger.earn(&alice, 10, "letter received", Some("letter-42"))?;
//!     let balance = ledger.balance(&alice)?;
//!     assert_eq!(balance.available(), 10);
//!     Ok(())
//! }
//! ```

use crate::{
    cache::BalanceCache,
    locks::LockTable,
    metrics::LedgerMetrics,
    storage::{Storage, WriteSet},
    types::{LedgerEntry, Page, Posting, UserBalance, UserId},
    Config, Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Durable store
    storage: Arc<Storage>,

    /// Per-user serialization
    locks: LockTable<UserId>,

    /// Read-through balance cache
    cache: BalanceCache,

    /// Metrics (optional)
    metrics: Option<LedgerMetrics>,
}

impl Ledger {
    /// Open the store described by `config`
    pub fn open(config: &Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(config)?);
        Ok(Self::with_storage(storage, config))
    }

    /// Build on an already opened store
    pub fn with_storage(storage: Arc<Storage>, config: &Config) -> Self {
        Self {
            storage,
            locks: LockTable::new(),
            cache: BalanceCache::new(config.cache.enabled, config.cache.max_entries),
            metrics: None,
        }
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: LedgerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Underlying store, shared with the transfer engine and limit enforcer
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Balance cache (read-only view)
    pub fn cache(&self) -> &BalanceCache {
        &self.cache
    }

    /// Create a zero balance if the user has none yet
    pub fn open_account(&self, user_id: &UserId) -> Result<UserBalance> {
        user_id.validate()?;
        let _guard = self.locks.lock(user_id);

        if let Some(existing) = self.storage.get_balance(user_id)? {
            return Ok(existing);
        }

        let balance = UserBalance::open(user_id.clone(), Utc::now());
        let mut ws = self.storage.write_set();
        ws.put_balance(&balance)?;
        self.storage.commit(ws)?;

        tracing::info!(user_id = %user_id, "Account opened");
        Ok(balance)
    }

    /// Whether a balance row exists for the user
    pub fn account_exists(&self, user_id: &UserId) -> Result<bool> {
        if self.cached_balance(user_id).is_some() {
            return Ok(true);
        }
        Ok(self.storage.get_balance(user_id)?.is_some())
    }

    /// Add points
    pub fn earn(
        &self,
        user_id: &UserId,
        amount: u64,
        description: &str,
        reference: Option<&str>,
    ) -> Result<LedgerEntry> {
        self.earn_with(user_id, amount, description, reference, |_| Ok::<(), Error>(()))
    }

    /// Move points from `available` to `used`; fails if `available < amount`
    pub fn spend(
        &self,
        user_id: &UserId,
        amount: u64,
        description: &str,
        reference: Option<&str>,
    ) -> Result<LedgerEntry> {
        self.spend_with(user_id, amount, description, reference, |_| Ok::<(), Error>(()))
    }

    /// Earn plus caller-staged writes in the same atomic unit
    pub fn earn_with<F, E>(
        &self,
        user_id: &UserId,
        amount: u64,
        description: &str,
        reference: Option<&str>,
        stage: F,
    ) -> std::result::Result<LedgerEntry, E>
    where
        F: FnOnce(&mut WriteSet<'_>) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        let posting = Posting::earn(
            user_id.clone(),
            amount,
            description,
            reference.map(str::to_string),
        );
        let mut entries = self.post_with(&[posting], stage)?;
        entries
            .pop()
            .ok_or_else(|| E::from(Error::InvariantViolation("posting produced no entry".into())))
    }

    /// Spend plus caller-staged writes in the same atomic unit
    pub fn spend_with<F, E>(
        &self,
        user_id: &UserId,
        amount: u64,
        description: &str,
        reference: Option<&str>,
        stage: F,
    ) -> std::result::Result<LedgerEntry, E>
    where
        F: FnOnce(&mut WriteSet<'_>) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        let posting = Posting::spend(
            user_id.clone(),
            amount,
            description,
            reference.map(str::to_string),
        );
        let mut entries = self.post_with(&[posting], stage)?;
        entries
            .pop()
            .ok_or_else(|| E::from(Error::InvariantViolation("posting produced no entry".into())))
    }

    /// Apply several postings atomically
    pub fn post(&self, postings: &[Posting]) -> Result<Vec<LedgerEntry>> {
        self.post_with(postings, |_| Ok::<(), Error>(()))
    }

    /// Apply postings and caller-staged writes as one atomic unit.
    ///
    /// `stage` runs after the postings were validated and before anything is
    /// written, with every touched user locked. Returning an error from it
    /// abandons the whole unit.
    pub fn post_with<F, E>(
        &self,
        postings: &[Posting],
        stage: F,
    ) -> std::result::Result<Vec<LedgerEntry>, E>
    where
        F: FnOnce(&mut WriteSet<'_>) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        if postings.is_empty() {
            return Err(Error::InvalidAmount("no postings supplied".to_string()).into());
        }
        for posting in postings {
            posting.user_id.validate()?;
            if posting.amount == 0 {
                return Err(Error::InvalidAmount("amount must be positive".to_string()).into());
            }
        }

        let _guards = self.locks.lock_many(postings.iter().map(|p| &p.user_id));
        let now = Utc::now();

        let mut balances: HashMap<UserId, UserBalance> = HashMap::new();
        for posting in postings {
            if !balances.contains_key(&posting.user_id) {
                let balance = self
                    .storage
                    .get_balance(&posting.user_id)?
                    .unwrap_or_else(|| UserBalance::open(posting.user_id.clone(), now));
                balances.insert(posting.user_id.clone(), balance);
            }
        }

        let mut entries = Vec::with_capacity(postings.len());
        for posting in postings {
            let balance = balances
                .get_mut(&posting.user_id)
                .ok_or_else(|| Error::InvariantViolation("balance not loaded".to_string()))?;

            match balance.apply_posting(posting, now) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    if matches!(err, Error::InsufficientBalance { .. }) {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_insufficient_balance();
                        }
                        tracing::debug!(
                            user_id = %posting.user_id,
                            amount = posting.amount,
                            "Spend refused: insufficient balance"
                        );
                    }
                    return Err(err.into());
                }
            }
        }

        let mut ws = self.storage.write_set();
        for balance in balances.values() {
            ws.put_balance(balance)?;
        }
        for entry in &entries {
            ws.put_entry(entry)?;
        }

        stage(&mut ws)?;

        let started = Instant::now();
        self.storage.commit(ws)?;

        for user_id in balances.keys() {
            if self.cache.invalidate(user_id) {
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_invalidation();
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_commit_duration(started.elapsed().as_secs_f64());
            for entry in &entries {
                metrics.record_entry(entry.direction, entry.amount);
            }
        }

        for entry in &entries {
            tracing::info!(
                user_id = %entry.user_id,
                direction = %entry.direction,
                amount = entry.amount,
                balance_after = entry.balance_after,
                reference = entry.reference.as_deref().unwrap_or(""),
                "Ledger entry committed"
            );
        }

        Ok(entries)
    }

    /// Point-in-time balance
    pub fn balance(&self, user_id: &UserId) -> Result<UserBalance> {
        if let Some(balance) = self.cached_balance(user_id) {
            return Ok(balance);
        }

        let _guard = self.locks.lock(user_id);
        let balance = self
            .storage
            .get_balance(user_id)?
            .ok_or_else(|| Error::AccountNotFound(user_id.to_string()))?;
        self.cache.fill(&balance);
        Ok(balance)
    }

    /// Entries for a user, newest first
    pub fn history(&self, user_id: &UserId, page: Page) -> Result<Vec<LedgerEntry>> {
        page.validate()?;
        if !self.account_exists(user_id)? {
            return Err(Error::AccountNotFound(user_id.to_string()));
        }

        self.storage
            .entry_ids_desc(user_id, page.offset(), page.limit as usize)?
            .into_iter()
            .map(|id| self.storage.get_entry(id))
            .collect()
    }

    /// Ranking by `total`, ties broken by earliest account creation
    pub fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let mut balances = self.storage.all_balances()?;
        balances.sort_by(|a, b| {
            b.total()
                .cmp(&a.total())
                .then(a.created_at().cmp(&b.created_at()))
                .then(a.user_id().cmp(b.user_id()))
        });

        Ok(balances
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, balance)| LeaderboardEntry {
                rank: i as u32 + 1,
                user_id: balance.user_id().clone(),
                total: balance.total(),
                level: balance.level(),
                account_created_at: balance.created_at(),
            })
            .collect())
    }

    /// Replay the user's entries and compare with the materialized balance
    pub fn reconcile(&self, user_id: &UserId) -> Result<Reconciliation> {
        let _guard = self.locks.lock(user_id);

        let balance = self
            .storage
            .get_balance(user_id)?
            .ok_or_else(|| Error::AccountNotFound(user_id.to_string()))?;

        let mut replayed: i128 = 0;
        let mut min_seen: i128 = 0;
        let ids = self.storage.entry_ids_asc(user_id)?;
        for id in &ids {
            let entry = self.storage.get_entry(*id)?;
            replayed += entry.signed_amount();
            min_seen = min_seen.min(replayed);
        }

        let consistent = replayed == balance.available() as i128
            && balance.total() == balance.available() + balance.used()
            && ids.len() as u64 == balance.entry_count()
            && min_seen >= 0;

        if !consistent {
            tracing::error!(
                user_id = %user_id,
                replayed,
                available = balance.available(),
                "Ledger replay does not match balance"
            );
        }

        Ok(Reconciliation {
            user_id: user_id.clone(),
            entry_count: ids.len() as u64,
            replayed_available: replayed,
            available: balance.available(),
            total: balance.total(),
            used: balance.used(),
            consistent,
        })
    }

    fn cached_balance(&self, user_id: &UserId) -> Option<UserBalance> {
        let cached = self.cache.get(user_id);
        if let (Some(metrics), true) = (&self.metrics, self.cache.is_enabled()) {
            metrics.record_cache_lookup(cached.is_some());
        }
        cached
    }
}

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based rank
    pub rank: u32,
    /// Account
    pub user_id: UserId,
    /// `total` points
    pub total: u64,
    /// Current level
    pub level: u32,
    /// Tie-breaker
    pub account_created_at: DateTime<Utc>,
}

/// Result of replaying a user's entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Account
    pub user_id: UserId,
    /// Entries replayed
    pub entry_count: u64,
    /// Signed sum of entries
    pub replayed_available: i128,
    /// Materialized `available`
    pub available: u64,
    /// Materialized `total`
    pub total: u64,
    /// Materialized `used`
    pub used: u64,
    /// Replay matches and `total == available + used`
    pub consistent: bool,
}
