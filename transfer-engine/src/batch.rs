//! Batch transfers
//!
//! One sender, many recipients. Each recipient gets its own transfer and
//! its own escrow debit; a failure for one recipient does not undo the
//! others. The result lists every recipient's outcome in request order.

use crate::{
    engine::TransferEngine,
    types::{CreateTransfer, Transfer, TransferType},
    Error, Result,
};
use chrono::Duration;
use points_ledger::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Basis points in 100%
const BPS_SCALE: u64 = 10_000;

/// Fee charged per child transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeePolicy {
    /// No fee
    Waived,
    /// Same fee for every recipient
    Flat(u64),
    /// Share of each amount in basis points, rounded down
    BasisPoints(u32),
}

impl FeePolicy {
    /// Reject rates above 100%
    pub fn validate(&self) -> Result<()> {
        if let FeePolicy::BasisPoints(bps) = self {
            if u64::from(*bps) > BPS_SCALE {
                return Err(Error::InvalidBatch(format!(
                    "fee of {} bps exceeds 100%",
                    bps
                )));
            }
        }
        Ok(())
    }

    /// Fee for one child transfer of `amount`
    pub fn fee_for(&self, amount: u64) -> u64 {
        match self {
            FeePolicy::Waived => 0,
            FeePolicy::Flat(fee) => *fee,
            FeePolicy::BasisPoints(bps) => {
                (u128::from(amount) * u128::from(*bps) / u128::from(BPS_SCALE)) as u64
            }
        }
    }
}

/// One recipient of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecipient {
    /// Receiver
    pub to_user_id: UserId,
    /// Points to deliver
    pub amount: u64,
}

impl BatchRecipient {
    /// Create recipient entry
    pub fn new(to_user_id: impl Into<UserId>, amount: u64) -> Self {
        Self {
            to_user_id: to_user_id.into(),
            amount,
        }
    }
}

/// Outcome for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOutcome {
    /// Child transfer created and escrowed
    Created(Transfer),
    /// Child transfer refused
    Failed {
        /// Receiver
        to_user_id: UserId,
        /// Requested amount
        amount: u64,
        /// Why it was refused
        reason: String,
    },
}

impl BatchOutcome {
    /// Whether the child transfer was created
    pub fn is_created(&self) -> bool {
        matches!(self, BatchOutcome::Created(_))
    }
}

/// Result of a batch request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Shared by every child transfer
    pub batch_id: Uuid,
    /// One entry per recipient, in request order
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchResult {
    /// Children created
    pub fn created(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_created()).count()
    }

    /// Children refused
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.created()
    }

    /// Points escrowed across created children
    pub fn escrowed(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                BatchOutcome::Created(t) => Some(t.escrow()),
                BatchOutcome::Failed { .. } => None,
            })
            .sum()
    }
}

impl TransferEngine {
    /// Create one transfer per recipient. Not atomic across recipients.
    pub fn batch_create(
        &self,
        from_user_id: &UserId,
        recipients: &[BatchRecipient],
        fee_policy: FeePolicy,
        ttl: Option<Duration>,
    ) -> Result<BatchResult> {
        if recipients.is_empty() {
            return Err(Error::InvalidBatch("no recipients".to_string()));
        }
        let max = self.config().max_batch_recipients;
        if recipients.len() > max {
            return Err(Error::InvalidBatch(format!(
                "{} recipients exceeds the maximum of {}",
                recipients.len(),
                max
            )));
        }
        fee_policy.validate()?;

        let batch_id = Uuid::now_v7();
        let transfer_type = TransferType::BatchChild { batch_id };

        let outcomes: Vec<BatchOutcome> = recipients
            .iter()
            .map(|recipient| {
                let request = CreateTransfer {
                    id: None,
                    from_user_id: from_user_id.clone(),
                    to_user_id: recipient.to_user_id.clone(),
                    amount: recipient.amount,
                    fee: fee_policy.fee_for(recipient.amount),
                    ttl,
                };
                match self.create_typed(request, transfer_type) {
                    Ok(transfer) => BatchOutcome::Created(transfer),
                    Err(err) => BatchOutcome::Failed {
                        to_user_id: recipient.to_user_id.clone(),
                        amount: recipient.amount,
                        reason: err.to_string(),
                    },
                }
            })
            .collect();

        let result = BatchResult { batch_id, outcomes };
        tracing::info!(
            batch_id = %batch_id,
            from = %from_user_id,
            created = result.created(),
            failed = result.failed(),
            "Batch transfer processed"
        );
        Ok(result)
    }
}
