//! Keyed lock table
//!
//! One mutex per key, created on demand and pruned once no guard or waiter
//! references it. Used for per-user serialization in the ledger and
//! per-transfer serialization in the transfer engine.

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

type Slots<K> = DashMap<K, Arc<Mutex<()>>>;

/// Table of independent mutexes keyed by `K`
pub struct LockTable<K: Eq + Hash + Clone> {
    slots: Arc<Slots<K>>,
}

impl<K: Eq + Hash + Clone> LockTable<K> {
    /// Empty table
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Block until the lock for `key` is held
    pub fn lock(&self, key: &K) -> KeyGuard<K> {
        // Clone the Arc out first so the shard lock is released before blocking
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        KeyGuard {
            key: key.clone(),
            guard: Some(slot.lock_arc()),
            slots: self.slots.clone(),
        }
    }

    /// Number of keys currently tracked
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }
}

impl<K: Eq + Hash + Clone + Ord> LockTable<K> {
    /// Lock several keys in ascending order, skipping duplicates.
    ///
    /// Every multi-key caller goes through here, so two callers can never
    /// hold overlapping keys in opposite orders.
    pub fn lock_many<'a, I>(&self, keys: I) -> Vec<KeyGuard<K>>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let ordered: BTreeSet<&K> = keys.into_iter().collect();
        ordered.into_iter().map(|key| self.lock(key)).collect()
    }
}

impl<K: Eq + Hash + Clone> Default for LockTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> fmt::Debug for LockTable<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTable")
            .field("tracked", &self.slots.len())
            .finish()
    }
}

/// Held lock; released (and the slot pruned if idle) on drop
pub struct KeyGuard<K: Eq + Hash + Clone> {
    key: K,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
    slots: Arc<Slots<K>>,
}

impl<K: Eq + Hash + Clone> KeyGuard<K> {
    /// Key this guard holds
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table itself still references the slot: nobody holds or awaits it
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl<K: Eq + Hash + Clone> fmt::Debug for KeyGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard").finish_non_exhaustive()
    }
}
