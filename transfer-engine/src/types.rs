//! Transfer data model

use chrono::{DateTime, Duration, Utc};
use points_ledger::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Transfer identifier (UUIDv7 when generated here)
pub type TransferId = Uuid;

/// Transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Escrowed, awaiting resolution
    Pending,
    /// Accepted, receiver credited
    Processed,
    /// Canceled by the sender or an administrator, sender refunded
    Canceled,
    /// Rejected by the receiver, sender refunded
    Rejected,
    /// Deadline passed, sender refunded by the scheduler
    Expired,
}

impl TransferStatus {
    /// Every status, pending first
    pub const ALL: [TransferStatus; 5] = [
        TransferStatus::Pending,
        TransferStatus::Processed,
        TransferStatus::Canceled,
        TransferStatus::Rejected,
        TransferStatus::Expired,
    ];

    /// No further transition possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }

    /// Lowercase label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processed => "processed",
            TransferStatus::Canceled => "canceled",
            TransferStatus::Rejected => "rejected",
            TransferStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the transfer was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    /// Single transfer
    Direct,
    /// One recipient of a batch request
    BatchChild {
        /// Shared by every child of the batch
        batch_id: Uuid,
    },
}

/// Escrowed peer-to-peer transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Transfer ID
    pub id: TransferId,
    /// Sender
    pub from_user_id: UserId,
    /// Receiver
    pub to_user_id: UserId,
    /// Points delivered on accept
    pub amount: u64,
    /// Points charged to the sender on top of `amount`
    pub fee: u64,
    /// Current status
    pub status: TransferStatus,
    /// Direct or batch child
    pub transfer_type: TransferType,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Deadline for accept/reject/cancel
    pub expires_at: DateTime<Utc>,
    /// Set once, when the status becomes terminal
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// Points held in escrow while pending
    pub fn escrow(&self) -> u64 {
        self.amount + self.fee
    }

    /// Sender or receiver
    pub fn involves(&self, user_id: &UserId) -> bool {
        &self.from_user_id == user_id || &self.to_user_id == user_id
    }

    /// Deadline elapsed at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Create request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTransfer {
    /// Caller-supplied id, used as an idempotency key
    pub id: Option<TransferId>,
    /// Sender
    pub from_user_id: UserId,
    /// Receiver
    pub to_user_id: UserId,
    /// Points to deliver
    pub amount: u64,
    /// Fee charged to the sender
    pub fee: u64,
    /// Time to live; `None` uses the configured default
    pub ttl: Option<Duration>,
}

impl CreateTransfer {
    /// Request with no fee and the default TTL
    pub fn new(from_user_id: UserId, to_user_id: UserId, amount: u64) -> Self {
        Self {
            id: None,
            from_user_id,
            to_user_id,
            amount,
            fee: 0,
            ttl: None,
        }
    }

    /// Set the fee
    pub fn with_fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    /// Set the TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the idempotency id
    pub fn with_id(mut self, id: TransferId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Who is asking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Authenticated end user
    User(UserId),
    /// Administrator, sees every transfer
    Admin,
}

/// Transfers per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Pending
    pub pending: u64,
    /// Processed
    pub processed: u64,
    /// Canceled
    pub canceled: u64,
    /// Rejected
    pub rejected: u64,
    /// Expired
    pub expired: u64,
}

impl StatusCounts {
    /// Count one transfer
    pub fn record(&mut self, status: TransferStatus) {
        let slot = match status {
            TransferStatus::Pending => &mut self.pending,
            TransferStatus::Processed => &mut self.processed,
            TransferStatus::Canceled => &mut self.canceled,
            TransferStatus::Rejected => &mut self.rejected,
            TransferStatus::Expired => &mut self.expired,
        };
        *slot += 1;
    }

    /// Sum over every status
    pub fn total(&self) -> u64 {
        self.pending + self.processed + self.canceled + self.rejected + self.expired
    }
}

/// Per-user transfer statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    /// User
    pub user_id: UserId,
    /// Transfers the user sent, by status
    pub sent: StatusCounts,
    /// Transfers the user received, by status
    pub received: StatusCounts,
    /// Points delivered by processed outgoing transfers
    pub points_sent: u64,
    /// Points received through processed incoming transfers
    pub points_received: u64,
    /// Fees consumed by processed outgoing transfers
    pub fees_paid: u64,
    /// `amount + fee` still escrowed in pending outgoing transfers
    pub escrowed: u64,
}

impl TransferStats {
    /// Empty statistics
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            sent: StatusCounts::default(),
            received: StatusCounts::default(),
            points_sent: 0,
            points_received: 0,
            fees_paid: 0,
            escrowed: 0,
        }
    }

    /// Fold one transfer into the statistics
    pub fn record(&mut self, transfer: &Transfer) {
        if transfer.from_user_id == self.user_id {
            self.sent.record(transfer.status);
            match transfer.status {
                TransferStatus::Processed => {
                    self.points_sent += transfer.amount;
                    self.fees_paid += transfer.fee;
                }
                TransferStatus::Pending => self.escrowed += transfer.escrow(),
                _ => {}
            }
        }
        if transfer.to_user_id == self.user_id {
            self.received.record(transfer.status);
            if transfer.status == TransferStatus::Processed {
                self.points_received += transfer.amount;
            }
        }
    }
}
