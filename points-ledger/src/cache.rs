//! Read-through balance cache
//!
//! The store stays the system of record. Entries are filled on a miss while
//! the user's ledger lock is held and removed by the ledger after every
//! commit under that same lock, so a reader can never repopulate a value
//! older than the last committed write.

use crate::types::{UserBalance, UserId};
use dashmap::DashMap;

/// Process-wide balance cache keyed by user
#[derive(Debug)]
pub struct BalanceCache {
    entries: DashMap<UserId, UserBalance>,
    enabled: bool,
    max_entries: usize,
}

impl BalanceCache {
    /// Create cache
    pub fn new(enabled: bool, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            enabled,
            max_entries,
        }
    }

    /// Whether lookups can ever hit
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached balance, if any
    pub fn get(&self, user_id: &UserId) -> Option<UserBalance> {
        if !self.enabled {
            return None;
        }
        self.entries.get(user_id).map(|entry| entry.value().clone())
    }

    /// Fill after a store read. Caller holds the user's ledger lock.
    pub(crate) fn fill(&self, balance: &UserBalance) {
        if !self.enabled {
            return;
        }
        if self.entries.len() >= self.max_entries {
            self.entries.clear();
        }
        self.entries
            .insert(balance.user_id().clone(), balance.clone());
    }

    /// Drop a user's cached balance, reporting whether one was held.
    /// Caller holds the user's ledger lock.
    pub(crate) fn invalidate(&self, user_id: &UserId) -> bool {
        self.entries.remove(user_id).is_some()
    }

    /// Number of cached balances
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
