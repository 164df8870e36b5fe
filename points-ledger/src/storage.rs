//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `balances` - Materialized balances (key: user)
//! - `entries` - Append-only ledger entries (key: entry_id)
//! - `entry_index` - Per-user entry order (key: user || sequence)
//! - `transfers` - Transfer workflow state (key: transfer_id)
//! - `transfer_index` - Per-user transfer order (key: user || created_at || transfer_id)
//! - `pending_expiry` - Pending transfers by deadline (key: expires_at || transfer_id)
//! - `expiration_batches` - Expiration scheduler bookkeeping (key: batch_id)
//! - `limit_rules` - Limit rules (key: action)
//! - `limit_usage` - Per-period usage counters (key: user || action || period)
//!
//! The first three families belong to the ledger and can only be written
//! from this crate. Everything else is reachable through [`Table`].

use crate::{
    error::{Error, Result},
    types::{LedgerEntry, UserBalance, UserId},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, Direction, IteratorMode, Options,
    WriteBatch, WriteOptions, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use uuid::Uuid;

/// Column family names
const CF_BALANCES: &str = "balances";
const CF_ENTRIES: &str = "entries";
const CF_ENTRY_INDEX: &str = "entry_index";
const CF_TRANSFERS: &str = "transfers";
const CF_TRANSFER_INDEX: &str = "transfer_index";
const CF_PENDING_EXPIRY: &str = "pending_expiry";
const CF_EXPIRATION_BATCHES: &str = "expiration_batches";
const CF_LIMIT_RULES: &str = "limit_rules";
const CF_LIMIT_USAGE: &str = "limit_usage";

const ALL_CFS: [&str; 9] = [
    CF_BALANCES,
    CF_ENTRIES,
    CF_ENTRY_INDEX,
    CF_TRANSFERS,
    CF_TRANSFER_INDEX,
    CF_PENDING_EXPIRY,
    CF_EXPIRATION_BATCHES,
    CF_LIMIT_RULES,
    CF_LIMIT_USAGE,
];

/// Column families writable outside the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    /// Transfer records
    Transfers,
    /// Per-user transfer index
    TransferIndex,
    /// Pending transfers ordered by deadline
    PendingExpiry,
    /// Expiration scheduler batches
    ExpirationBatches,
    /// Limit rules
    LimitRules,
    /// Limit usage counters
    LimitUsage,
}

impl Table {
    fn cf_name(&self) -> &'static str {
        match self {
            Table::Transfers => CF_TRANSFERS,
            Table::TransferIndex => CF_TRANSFER_INDEX,
            Table::PendingExpiry => CF_PENDING_EXPIRY,
            Table::ExpirationBatches => CF_EXPIRATION_BATCHES,
            Table::LimitRules => CF_LIMIT_RULES,
            Table::LimitUsage => CF_LIMIT_USAGE,
        }
    }
}

/// Key encoding helpers shared by every crate writing to the store
pub mod keys {
    use crate::types::UserId;
    use chrono::{DateTime, Utc};

    /// Length-prefixed user key, so no user id is a prefix of another's keys
    pub fn user(user_id: &UserId) -> Vec<u8> {
        let bytes = user_id.as_str().as_bytes();
        let mut key = Vec::with_capacity(2 + bytes.len());
        key.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        key.extend_from_slice(bytes);
        key
    }

    /// Order-preserving big-endian encoding of a timestamp
    pub fn timestamp(at: DateTime<Utc>) -> [u8; 8] {
        let nanos = at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| at.timestamp_micros().saturating_mul(1_000));
        ((nanos as u64) ^ (1u64 << 63)).to_be_bytes()
    }

    /// Smallest key greater than every key starting with `prefix`
    pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
        let mut next = prefix.to_vec();
        while let Some(last) = next.pop() {
            if last < u8::MAX {
                next.push(last + 1);
                return Some(next);
            }
        }
        None
    }
}

/// Decode a value read through [`Storage::visit_prefix`]
pub fn decode<T: DeserializeOwned>(value: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(value)?)
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    sync_writes: bool,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name)))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = ?path,
            column_families = ALL_CFS.len(),
            sync_writes = config.sync_writes,
            "Opened points store"
        );

        Ok(Self {
            db,
            sync_writes: config.sync_writes,
        })
    }

    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        match name {
            // Append-only, rarely read back in bulk
            CF_ENTRIES | CF_EXPIRATION_BATCHES => {
                opts.set_compression_type(DBCompressionType::Zstd);
            }
            _ => {
                opts.set_compression_type(DBCompressionType::Lz4);
            }
        }
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Generic table access

    /// Read and decode one value
    pub fn get<T: DeserializeOwned>(&self, table: Table, key: &[u8]) -> Result<Option<T>> {
        self.get_cf(table.cf_name(), key)
    }

    /// Visit keys starting with `prefix` in key order (or reverse key order).
    ///
    /// The visitor returns `false` to stop early.
    pub fn visit_prefix<F>(&self, table: Table, prefix: &[u8], reverse: bool, visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        self.visit_prefix_cf(table.cf_name(), prefix, reverse, visit)
    }

    /// Keys in `[lower, upper)`, ascending, at most `limit`
    pub fn keys_in_range(
        &self,
        table: Table,
        lower: &[u8],
        upper: &[u8],
        limit: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf_handle(table.cf_name())?;
        let mut keys = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(lower, Direction::Forward))
        {
            let (key, _) = item?;
            if key.as_ref() >= upper || keys.len() >= limit {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// Start an atomic write set
    pub fn write_set(&self) -> WriteSet<'_> {
        WriteSet {
            storage: self,
            batch: WriteBatch::default(),
        }
    }

    /// Commit a write set as one atomic unit
    pub fn commit(&self, write_set: WriteSet<'_>) -> Result<()> {
        let ops = write_set.batch.len();
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(write_set.batch, &opts)?;
        tracing::debug!(ops, "Write set committed");
        Ok(())
    }

    // Ledger-owned families

    pub(crate) fn get_balance(&self, user_id: &UserId) -> Result<Option<UserBalance>> {
        self.get_cf(CF_BALANCES, &keys::user(user_id))
    }

    pub(crate) fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        self.get_cf(CF_ENTRIES, entry_id.as_bytes())?
            .ok_or_else(|| Error::Storage(format!("Entry {} missing from log", entry_id)))
    }

    /// Entry ids for a user, newest first, after skipping `offset`
    pub(crate) fn entry_ids_desc(
        &self,
        user_id: &UserId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(limit);
        let mut skipped = 0usize;
        self.visit_prefix_cf(CF_ENTRY_INDEX, &keys::user(user_id), true, |_, value| {
            if skipped < offset {
                skipped += 1;
                return Ok(true);
            }
            let bytes: [u8; 16] = value
                .try_into()
                .map_err(|_| Error::Storage("Corrupt entry index value".to_string()))?;
            ids.push(Uuid::from_bytes(bytes));
            Ok(ids.len() < limit)
        })?;
        Ok(ids)
    }

    /// Every entry id for a user in sequence order
    pub(crate) fn entry_ids_asc(&self, user_id: &UserId) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        self.visit_prefix_cf(CF_ENTRY_INDEX, &keys::user(user_id), false, |_, value| {
            let bytes: [u8; 16] = value
                .try_into()
                .map_err(|_| Error::Storage("Corrupt entry index value".to_string()))?;
            ids.push(Uuid::from_bytes(bytes));
            Ok(true)
        })?;
        Ok(ids)
    }

    pub(crate) fn all_balances(&self) -> Result<Vec<UserBalance>> {
        let mut balances = Vec::new();
        self.visit_prefix_cf(CF_BALANCES, &[], false, |_, value| {
            balances.push(decode(value)?);
            Ok(true)
        })?;
        Ok(balances)
    }

    // Internals

    fn get_cf<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    fn visit_prefix_cf<F>(&self, cf_name: &str, prefix: &[u8], reverse: bool, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let cf = self.cf_handle(cf_name)?;

        let successor = keys::prefix_successor(prefix);
        let mode = match (reverse, successor.as_deref()) {
            (false, _) => IteratorMode::From(prefix, Direction::Forward),
            (true, Some(upper)) => IteratorMode::From(upper, Direction::Reverse),
            (true, None) => IteratorMode::End,
        };

        for item in self.db.iterator_cf(cf, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                // Reverse seek may land on the successor key itself
                if reverse && key.as_ref() > prefix {
                    continue;
                }
                break;
            }
            if !visit(&key, &value)? {
                break;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

/// Writes staged for one atomic commit
pub struct WriteSet<'a> {
    storage: &'a Storage,
    batch: WriteBatch,
}

impl<'a> WriteSet<'a> {
    /// Stage an encoded value
    pub fn put<T: Serialize>(&mut self, table: Table, key: &[u8], value: &T) -> Result<()> {
        self.put_cf(table.cf_name(), key, value)
    }

    /// Stage a key with no value (index rows)
    pub fn put_marker(&mut self, table: Table, key: &[u8]) -> Result<()> {
        let cf = self.storage.cf_handle(table.cf_name())?;
        self.batch.put_cf(cf, key, b"");
        Ok(())
    }

    /// Stage a delete
    pub fn delete(&mut self, table: Table, key: &[u8]) -> Result<()> {
        let cf = self.storage.cf_handle(table.cf_name())?;
        self.batch.delete_cf(cf, key);
        Ok(())
    }

    /// Store the write set belongs to, for reads inside a staging closure
    pub fn storage(&self) -> &'a Storage {
        self.storage
    }

    /// Staged operation count
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Nothing staged yet
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub(crate) fn put_balance(&mut self, balance: &UserBalance) -> Result<()> {
        self.put_cf(CF_BALANCES, &keys::user(balance.user_id()), balance)
    }

    pub(crate) fn put_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        self.put_cf(CF_ENTRIES, entry.id.as_bytes(), entry)?;

        let mut index_key = keys::user(&entry.user_id);
        index_key.extend_from_slice(&entry.sequence.to_be_bytes());
        let cf = self.storage.cf_handle(CF_ENTRY_INDEX)?;
        self.batch.put_cf(cf, index_key, entry.id.as_bytes());
        Ok(())
    }

    fn put_cf<T: Serialize>(&mut self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.storage.cf_handle(cf_name)?;
        let value = bincode::serialize(value)?;
        self.batch.put_cf(cf, key, value);
        Ok(())
    }
}

impl fmt::Debug for WriteSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSet")
            .field("ops", &self.batch.len())
            .finish()
    }
}
