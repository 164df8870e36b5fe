//! Core types for the ledger
//!
//! `UserBalance` exposes no public mutators. The only code that changes a
//! balance is [`UserBalance::apply_posting`], which is crate-private and
//! always returns the paired [`LedgerEntry`].

use crate::{level, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum accepted length of a user identifier (bytes)
pub const MAX_USER_ID_LEN: usize = 128;

/// Maximum page size for paginated reads
pub const MAX_PAGE_LIMIT: u32 = 100;

/// User identifier supplied by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject empty or oversized identifiers
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::InvalidUserId("empty user id".to_string()));
        }
        if self.0.len() > MAX_USER_ID_LEN {
            return Err(Error::InvalidUserId(format!(
                "user id longer than {} bytes",
                MAX_USER_ID_LEN
            )));
        }
        Ok(())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Points added to `available`
    Earn,
    /// Points moved from `available` to `used`
    Spend,
}

impl Direction {
    /// Lowercase label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Earn => "earn",
            Direction::Spend => "spend",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested balance change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    /// Account to change
    pub user_id: UserId,
    /// Earn or spend
    pub direction: Direction,
    /// Points, must be > 0
    pub amount: u64,
    /// Human readable description stored on the entry
    pub description: String,
    /// Opaque correlation id (transfer id, order id, ...)
    pub reference: Option<String>,
}

impl Posting {
    /// Earn posting
    pub fn earn(
        user_id: UserId,
        amount: u64,
        description: impl Into<String>,
        reference: Option<String>,
    ) -> Self {
        Self {
            user_id,
            direction: Direction::Earn,
            amount,
            description: description.into(),
            reference,
        }
    }

    /// Spend posting
    pub fn spend(
        user_id: UserId,
        amount: u64,
        description: impl Into<String>,
        reference: Option<String>,
    ) -> Self {
        Self {
            user_id,
            direction: Direction::Spend,
            amount,
            description: description.into(),
            reference,
        }
    }

    /// Signed effect on `available`
    pub fn signed_amount(&self) -> i128 {
        match self.direction {
            Direction::Earn => self.amount as i128,
            Direction::Spend => -(self.amount as i128),
        }
    }
}

/// Immutable record of one balance-affecting event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7)
    pub id: Uuid,
    /// Account the entry belongs to
    pub user_id: UserId,
    /// Earn or spend
    pub direction: Direction,
    /// Points, always > 0
    pub amount: u64,
    /// `available` after this entry was applied
    pub balance_after: u64,
    /// Human readable description
    pub description: String,
    /// Correlation id supplied by the caller
    pub reference: Option<String>,
    /// Per-user sequence number, starting at 1
    pub sequence: u64,
    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed effect on `available`
    pub fn signed_amount(&self) -> i128 {
        match self.direction {
            Direction::Earn => self.amount as i128,
            Direction::Spend => -(self.amount as i128),
        }
    }
}

/// Materialized per-user balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalance {
    user_id: UserId,
    total: u64,
    available: u64,
    used: u64,
    earned: u64,
    level: u32,
    entry_count: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserBalance {
    pub(crate) fn open(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total: 0,
            available: 0,
            used: 0,
            earned: 0,
            level: level::level_for(0),
            entry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Account owner
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// `available + used`
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Spendable points
    pub fn available(&self) -> u64 {
        self.available
    }

    /// Points already spent
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Lifetime earned points
    pub fn earned(&self) -> u64 {
        self.earned
    }

    /// Tier derived from `earned`
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Number of entries written for this account
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Account creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last mutation time
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Apply a posting and produce its entry.
    ///
    /// The balance is left untouched when an error is returned.
    pub(crate) fn apply_posting(
        &mut self,
        posting: &Posting,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        if posting.amount == 0 {
            return Err(Error::InvalidAmount("amount must be positive".to_string()));
        }

        let mut next = self.clone();
        match posting.direction {
            Direction::Earn => {
                next.total = checked(self.total, posting.amount)?;
                next.available = checked(self.available, posting.amount)?;
                next.earned = checked(self.earned, posting.amount)?;
                next.level = level::level_for(next.earned).max(self.level);
            }
            Direction::Spend => {
                if self.available < posting.amount {
                    return Err(Error::InsufficientBalance {
                        user_id: self.user_id.to_string(),
                        available: self.available,
                        requested: posting.amount,
                    });
                }
                next.available = self.available - posting.amount;
                next.used = checked(self.used, posting.amount)?;
            }
        }
        next.entry_count = self.entry_count + 1;
        next.updated_at = now;

        debug_assert_eq!(next.total, next.available + next.used);

        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            user_id: self.user_id.clone(),
            direction: posting.direction,
            amount: posting.amount,
            balance_after: next.available,
            description: posting.description.clone(),
            reference: posting.reference.clone(),
            sequence: next.entry_count,
            created_at: now,
        };

        *self = next;
        Ok(entry)
    }
}

fn checked(current: u64, delta: u64) -> Result<u64> {
    current
        .checked_add(delta)
        .ok_or_else(|| Error::InvariantViolation("balance counter overflow".to_string()))
}

/// Offset pagination, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Page number starting at 1
    pub page: u32,
    /// Items per page, 1..=100
    pub limit: u32,
}

impl Page {
    /// Create a page request
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Check bounds
    pub fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(Error::InvalidPage("page starts at 1".to_string()));
        }
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(Error::InvalidPage(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        Ok(())
    }

    /// Number of items to skip
    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance() -> UserBalance {
        UserBalance::open(UserId::new("alice"), Utc::now())
    }

    #[test]
    fn test_earn_updates_all_counters() {
        let mut b = balance();
        let entry = b
            .apply_posting(&Posting::earn("alice".into(), 150, "reward", None), Utc::now())
            .unwrap();

        assert_eq!(b.total(), 150);
        assert_eq!(b.available(), 150);
        assert_eq!(b.earned(), 150);
        assert_eq!(b.level(), 2);
        assert_eq!(entry.balance_after, 150);
        assert_eq!(entry.sequence, 1);
    }

    #[test]
    fn test_spend_moves_available_to_used() {
        let mut b = balance();
        b.apply_posting(&Posting::earn("alice".into(), 100, "reward", None), Utc::now())
            .unwrap();
        let entry = b
            .apply_posting(&Posting::spend("alice".into(), 40, "shop", None), Utc::now())
            .unwrap();

        assert_eq!(b.total(), 100);
        assert_eq!(b.available(), 60);
        assert_eq!(b.used(), 40);
        assert_eq!(entry.balance_after, 60);
        assert_eq!(entry.direction, Direction::Spend);
    }

    #[test]
    fn test_overdraft_leaves_balance_untouched() {
        let mut b = balance();
        b.apply_posting(&Posting::earn("alice".into(), 10, "reward", None), Utc::now())
            .unwrap();
        let before = b.clone();

        let err = b
            .apply_posting(&Posting::spend("alice".into(), 11, "shop", None), Utc::now())
            .unwrap_err();

        assert!(matches!(err, Error::InsufficientBalance { available: 10, requested: 11, .. }));
        assert_eq!(b, before);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let mut b = balance();
        let err = b
            .apply_posting(&Posting::earn("alice".into(), 0, "reward", None), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
        assert_eq!(b.entry_count(), 0);
    }

    #[test]
    fn test_user_id_validation() {
        assert!(UserId::new("").validate().is_err());
        assert!(UserId::new("x".repeat(MAX_USER_ID_LEN + 1)).validate().is_err());
        assert!(UserId::new("penpal-42").validate().is_ok());
    }

    #[test]
    fn test_page_bounds() {
        assert!(Page::new(0, 10).validate().is_err());
        assert!(Page::new(1, 0).validate().is_err());
        assert!(Page::new(1, MAX_PAGE_LIMIT + 1).validate().is_err());
        assert_eq!(Page::new(3, 20).offset(), 40);
    }
}
