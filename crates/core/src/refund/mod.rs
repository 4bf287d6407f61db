//! Refunds against capture entries.
//!
//! Only the wallet that received a capture can refund it, and the sum of
//! refunds linked to a capture never exceeds the captured amount. Refunds
//! move available funds from the capture's recipient back to the original
//! payer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tesoro_shared::types::{AccountId, EntryId, RefundId};
use tesoro_shared::{ApiKeyIdentity, Money, Scope};

use crate::idempotency::IdempotencyKey;
use crate::ledger::executor::{LedgerOperation, LockedAccounts, OperationPlan, SpendCheck};
use crate::ledger::posting::{refund_lines, EntryDraft};
use crate::ledger::types::{
    AccountStatus, Bucket, EntryKind, JournalEntry, Refund, RefundStatus, Side,
};
use crate::ledger::LedgerError;
use crate::store::LedgerStore;

/// A refund request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    /// The capture entry to refund.
    pub capture_entry_id: EntryId,
    /// Amount to refund; defaults to everything still refundable.
    pub amount: Option<Money>,
}

impl RefundRequest {
    /// Shape validation performed before the idempotency reservation.
    ///
    /// # Errors
    ///
    /// `Validation` if an explicit amount is non-positive.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if let Some(amount) = self.amount {
            if !amount.is_positive() {
                return Err(LedgerError::Validation(
                    "amount must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// The durable result of a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    /// The refund's id.
    pub refund_id: RefundId,
    /// The entry that posted the refund.
    pub entry_id: EntryId,
    /// The refunded capture entry.
    pub capture_entry_id: EntryId,
    /// Amount refunded by this call.
    pub amount: Money,
    /// Posting timestamp.
    pub created_at: DateTime<Utc>,
}

/// The accounts and amount a capture entry settled.
struct CaptureFacts {
    entry: JournalEntry,
    /// Account the capture debited (the payer's held bucket).
    payer_account: AccountId,
    /// Account the capture credited (the merchant's available bucket).
    merchant_account: AccountId,
    /// The captured amount.
    amount: Money,
}

async fn load_capture<S: LedgerStore>(
    store: &S,
    tx: &mut S::Tx,
    capture_entry_id: EntryId,
) -> Result<CaptureFacts, LedgerError> {
    let entry = store
        .find_entry(tx, capture_entry_id)
        .await?
        .ok_or(LedgerError::CaptureNotFound(capture_entry_id))?;
    if entry.kind != EntryKind::Capture {
        return Err(LedgerError::Validation(format!(
            "entry {capture_entry_id} is not a capture"
        )));
    }

    let lines = store.lines_for_entry(tx, capture_entry_id).await?;
    let debit = lines
        .iter()
        .find(|l| l.side == Side::Debit && l.bucket == Bucket::Held)
        .ok_or_else(|| LedgerError::Store("capture entry has no held debit line".to_string()))?;
    let credit = lines
        .iter()
        .find(|l| l.side == Side::Credit && l.bucket == Bucket::Available)
        .ok_or_else(|| {
            LedgerError::Store("capture entry has no available credit line".to_string())
        })?;

    Ok(CaptureFacts {
        payer_account: debit.account_id,
        merchant_account: credit.account_id,
        amount: credit.amount,
        entry,
    })
}

pub(crate) struct RefundOp {
    pub identity: ApiKeyIdentity,
    pub key: IdempotencyKey,
    pub request: RefundRequest,
}

#[async_trait]
impl<S: LedgerStore> LedgerOperation<S> for RefundOp {
    type Receipt = RefundReceipt;

    fn name(&self) -> &'static str {
        "refund"
    }

    fn scope(&self) -> Scope {
        Scope::Refund
    }

    async fn plan(&self, store: &S, tx: &mut S::Tx) -> Result<OperationPlan, LedgerError> {
        let capture = load_capture(store, tx, self.request.capture_entry_id).await?;

        let merchant = store
            .find_account(tx, capture.merchant_account)
            .await?
            .ok_or_else(|| {
                LedgerError::Store("capture references a missing account".to_string())
            })?;
        if merchant.wallet_id != self.identity.wallet_id {
            return Err(LedgerError::ForbiddenScope(
                "only the capture's recipient can refund it".to_string(),
            ));
        }

        // Best-effort spend figure for the ceiling check; re-validated under
        // the merchant lock in apply.
        let refunded = store
            .sum_refunds_for_capture(tx, capture.entry.id)
            .await?;
        let refundable = capture.amount.minor_units.saturating_sub(refunded).max(0);
        let spend_amount = self
            .request
            .amount
            .unwrap_or(Money::from_minor(refundable, capture.amount.currency));

        Ok(OperationPlan {
            locks: vec![capture.merchant_account, capture.payer_account],
            spend: if spend_amount.is_positive() {
                Some(SpendCheck {
                    payer: capture.merchant_account,
                    amount: spend_amount,
                })
            } else {
                None
            },
        })
    }

    async fn apply(
        &self,
        store: &S,
        tx: &mut S::Tx,
        accounts: &LockedAccounts,
        _now: DateTime<Utc>,
    ) -> Result<Self::Receipt, LedgerError> {
        let capture = load_capture(store, tx, self.request.capture_entry_id).await?;
        let merchant = accounts.require(capture.merchant_account)?;
        let payer = accounts.require(capture.payer_account)?;

        if merchant.status == AccountStatus::Frozen {
            return Err(LedgerError::AccountFrozen(merchant.id));
        }
        if payer.status == AccountStatus::Frozen {
            return Err(LedgerError::AccountFrozen(payer.id));
        }

        let refunded = store
            .sum_refunds_for_capture(tx, capture.entry.id)
            .await?;
        let refundable = capture
            .amount
            .minor_units
            .checked_sub(refunded)
            .ok_or(LedgerError::Arithmetic)?;

        let amount = self
            .request
            .amount
            .unwrap_or(Money::from_minor(refundable, capture.amount.currency));
        if amount.currency != capture.amount.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: capture.amount.currency,
                actual: amount.currency,
            });
        }
        if !amount.is_positive() {
            return Err(LedgerError::RefundExceedsCapture {
                requested: amount.minor_units,
                refundable,
            });
        }
        if amount.minor_units > refundable {
            return Err(LedgerError::RefundExceedsCapture {
                requested: amount.minor_units,
                refundable,
            });
        }

        let balances = store.sum_buckets(tx, merchant.id).await?;
        if balances.available < amount.minor_units {
            return Err(LedgerError::InsufficientFunds {
                available: balances.available,
                required: amount.minor_units,
            });
        }

        let draft = EntryDraft::new(
            EntryKind::Refund,
            self.identity.wallet_id,
            refund_lines(merchant.id, payer.id, amount),
        )?
        .with_link(capture.entry.id)
        .with_idempotency_key(self.key.as_str().to_string());
        let entry = store.insert_entry(tx, draft).await?;

        let refund = Refund {
            id: RefundId::new(),
            capture_entry_id: capture.entry.id,
            amount,
            status: RefundStatus::Posted,
            entry_id: entry.id,
            created_at: entry.created_at,
        };
        store.insert_refund(tx, refund.clone()).await?;

        tracing::info!(
            refund_id = %refund.id,
            entry_id = %entry.id,
            capture_entry_id = %capture.entry.id,
            amount = %amount,
            "refund posted"
        );

        Ok(RefundReceipt {
            refund_id: refund.id,
            entry_id: entry.id,
            capture_entry_id: capture.entry.id,
            amount,
            created_at: entry.created_at,
        })
    }
}
