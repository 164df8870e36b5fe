//! Transfer rows in the shared store
//!
//! - `transfers`: transfer id -> [`Transfer`]
//! - `transfer_index`: user || created_at || transfer id -> (empty), one row per party
//! - `pending_expiry`: expires_at || transfer id -> (empty), present only while pending
//!
//! Rows are only ever staged into a ledger write set, so they commit with
//! the escrow debit, credit or refund they belong to.

use crate::types::{Transfer, TransferId};
use chrono::{DateTime, Utc};
use points_ledger::{keys, Result, Storage, Table, UserId, WriteSet};
use uuid::Uuid;

/// Per-user index key
pub fn index_key(user_id: &UserId, created_at: DateTime<Utc>, id: TransferId) -> Vec<u8> {
    let mut key = keys::user(user_id);
    key.extend_from_slice(&keys::timestamp(created_at));
    key.extend_from_slice(id.as_bytes());
    key
}

/// Deadline index key
pub fn expiry_key(expires_at: DateTime<Utc>, id: TransferId) -> Vec<u8> {
    let mut key = keys::timestamp(expires_at).to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

/// Transfer id stored in the last 16 bytes of an index key
pub fn id_from_key(key: &[u8]) -> Option<TransferId> {
    let start = key.len().checked_sub(16)?;
    let bytes: [u8; 16] = key[start..].try_into().ok()?;
    Some(Uuid::from_bytes(bytes))
}

/// Load one transfer
pub fn load(storage: &Storage, id: TransferId) -> Result<Option<Transfer>> {
    storage.get(Table::Transfers, id.as_bytes())
}

/// Stage a freshly created transfer with both index rows and its deadline row
pub fn stage_created(ws: &mut WriteSet<'_>, transfer: &Transfer) -> Result<()> {
    ws.put(Table::Transfers, transfer.id.as_bytes(), transfer)?;
    for user_id in [&transfer.from_user_id, &transfer.to_user_id] {
        ws.put_marker(
            Table::TransferIndex,
            &index_key(user_id, transfer.created_at, transfer.id),
        )?;
    }
    ws.put_marker(
        Table::PendingExpiry,
        &expiry_key(transfer.expires_at, transfer.id),
    )
}

/// Stage a terminal transfer and drop its deadline row
pub fn stage_resolved(ws: &mut WriteSet<'_>, transfer: &Transfer) -> Result<()> {
    ws.put(Table::Transfers, transfer.id.as_bytes(), transfer)?;
    ws.delete(
        Table::PendingExpiry,
        &expiry_key(transfer.expires_at, transfer.id),
    )
}

/// Visit a user's transfer ids, newest first. The visitor returns `false` to stop.
pub fn visit_user_transfers<F>(storage: &Storage, user_id: &UserId, mut visit: F) -> Result<()>
where
    F: FnMut(TransferId) -> Result<bool>,
{
    storage.visit_prefix(Table::TransferIndex, &keys::user(user_id), true, |key, _| {
        match id_from_key(key) {
            Some(id) => visit(id),
            None => {
                tracing::warn!(key_len = key.len(), "Skipping malformed transfer index key");
                Ok(true)
            }
        }
    })
}

/// Deadline rows in `[after, before)`, oldest deadline first
pub fn due_keys(
    storage: &Storage,
    after: &[u8],
    before: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<Vec<u8>>> {
    storage.keys_in_range(Table::PendingExpiry, after, &keys::timestamp(before), limit)
}
