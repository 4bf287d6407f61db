//! Payment intents: payee-initiated requests a specific payer completes.
//!
//! PENDING → PAID | EXPIRED | CANCELLED. Paying posts a transfer-shaped
//! entry of kind `intent_pay`; the intent's creator cannot pay it. Expiry is
//! lazy, like holds: any pay or cancel touching a lapsed PENDING intent
//! marks it EXPIRED and fails with `INTENT_EXPIRED`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tesoro_shared::types::{EntryId, IntentId, WalletId};
use tesoro_shared::{ApiKeyIdentity, Money, Scope};

use crate::idempotency::IdempotencyKey;
use crate::ledger::executor::{LedgerOperation, LockedAccounts, OperationPlan, SpendCheck};
use crate::ledger::posting::{intent_pay_lines, EntryDraft};
use crate::ledger::types::{AccountStatus, EntryKind, IntentStatus, PaymentIntent};
use crate::ledger::LedgerError;
use crate::store::LedgerStore;

/// Longest accepted intent lifetime, per the API contract.
pub const MAX_EXPIRES_IN_SECONDS: i64 = 86_400;

/// An intent-create request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentCreateRequest {
    /// The amount the payee requests.
    pub amount: Money,
    /// Lifetime in seconds, `1..=86400`.
    pub expires_in_seconds: i64,
    /// Opaque metadata stored on the intent.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl IntentCreateRequest {
    /// Shape validation performed before the idempotency reservation.
    ///
    /// # Errors
    ///
    /// `Validation` for non-positive amounts or out-of-range lifetimes.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !self.amount.is_positive() {
            return Err(LedgerError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        if !(1..=MAX_EXPIRES_IN_SECONDS).contains(&self.expires_in_seconds) {
            return Err(LedgerError::Validation(format!(
                "expires_in_seconds must be within 1..={MAX_EXPIRES_IN_SECONDS}"
            )));
        }
        Ok(())
    }
}

/// The durable result of creating an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentReceipt {
    /// The intent's id.
    pub intent_id: IntentId,
    /// Requested amount.
    pub amount: Money,
    /// Lifecycle state.
    pub status: IntentStatus,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// An intent-pay request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPayRequest {
    /// The intent to pay.
    pub intent_id: IntentId,
}

/// The durable result of paying an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentPayReceipt {
    /// The settlement entry.
    pub entry_id: EntryId,
    /// The paid intent.
    pub intent_id: IntentId,
    /// Paying wallet.
    pub payer_wallet_id: WalletId,
    /// Amount moved.
    pub amount: Money,
    /// Posting timestamp.
    pub created_at: DateTime<Utc>,
}

/// An intent-cancel request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentCancelRequest {
    /// The intent to cancel.
    pub intent_id: IntentId,
}

/// The durable result of cancelling an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentCancelReceipt {
    /// The cancelled intent.
    pub intent_id: IntentId,
    /// Lifecycle state after cancellation.
    pub status: IntentStatus,
}

async fn load_intent<S: LedgerStore>(
    store: &S,
    tx: &mut S::Tx,
    id: IntentId,
) -> Result<PaymentIntent, LedgerError> {
    store
        .find_intent(tx, id)
        .await?
        .ok_or(LedgerError::IntentNotFound(id))
}

/// Materializes lazy expiry of a PENDING intent. The caller returns
/// `IntentExpired`, which commits this status change with the failure
/// record.
async fn expire_intent<S: LedgerStore>(
    store: &S,
    tx: &mut S::Tx,
    intent: &mut PaymentIntent,
) -> Result<(), LedgerError> {
    intent.status = IntentStatus::Expired;
    store.update_intent(tx, intent).await?;
    tracing::info!(intent_id = %intent.id, "payment intent expired lazily on access");
    Ok(())
}

pub(crate) struct IntentCreateOp {
    pub identity: ApiKeyIdentity,
    pub request: IntentCreateRequest,
}

#[async_trait]
impl<S: LedgerStore> LedgerOperation<S> for IntentCreateOp {
    type Receipt = IntentReceipt;

    fn name(&self) -> &'static str {
        "intent_create"
    }

    fn scope(&self) -> Scope {
        Scope::IntentCreate
    }

    async fn plan(&self, store: &S, tx: &mut S::Tx) -> Result<OperationPlan, LedgerError> {
        let payee = store
            .find_account_for_wallet(tx, self.identity.wallet_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Validation("caller wallet has no ledger account".to_string())
            })?;
        Ok(OperationPlan {
            locks: vec![payee.id],
            spend: None,
        })
    }

    async fn apply(
        &self,
        store: &S,
        tx: &mut S::Tx,
        accounts: &LockedAccounts,
        now: DateTime<Utc>,
    ) -> Result<Self::Receipt, LedgerError> {
        let payee = accounts
            .iter()
            .map(|(_, account)| account)
            .next()
            .ok_or_else(|| {
                LedgerError::InvariantViolation("payee missing from lock set".to_string())
            })?;

        if payee.status == AccountStatus::Frozen {
            return Err(LedgerError::AccountFrozen(payee.id));
        }
        if payee.currency != self.request.amount.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: payee.currency,
                actual: self.request.amount.currency,
            });
        }

        let intent = PaymentIntent {
            id: IntentId::new(),
            payee_account_id: payee.id,
            amount: self.request.amount,
            status: IntentStatus::Pending,
            expires_at: now + Duration::seconds(self.request.expires_in_seconds),
            metadata: self.request.metadata.clone(),
            payer_account_id: None,
            paid_entry_id: None,
            created_at: now,
        };
        store.insert_intent(tx, intent.clone()).await?;

        tracing::info!(
            intent_id = %intent.id,
            amount = %intent.amount,
            expires_at = %intent.expires_at,
            "payment intent created"
        );

        Ok(IntentReceipt {
            intent_id: intent.id,
            amount: intent.amount,
            status: intent.status,
            expires_at: intent.expires_at,
            created_at: intent.created_at,
        })
    }
}

pub(crate) struct IntentPayOp {
    pub identity: ApiKeyIdentity,
    pub key: IdempotencyKey,
    pub request: IntentPayRequest,
}

#[async_trait]
impl<S: LedgerStore> LedgerOperation<S> for IntentPayOp {
    type Receipt = IntentPayReceipt;

    fn name(&self) -> &'static str {
        "intent_pay"
    }

    fn scope(&self) -> Scope {
        Scope::IntentPay
    }

    async fn plan(&self, store: &S, tx: &mut S::Tx) -> Result<OperationPlan, LedgerError> {
        let intent = load_intent(store, tx, self.request.intent_id).await?;
        let payer = store
            .find_account_for_wallet(tx, self.identity.wallet_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Validation("caller wallet has no ledger account".to_string())
            })?;
        Ok(OperationPlan {
            locks: vec![payer.id, intent.payee_account_id],
            spend: Some(SpendCheck {
                payer: payer.id,
                amount: intent.amount,
            }),
        })
    }

    async fn apply(
        &self,
        store: &S,
        tx: &mut S::Tx,
        accounts: &LockedAccounts,
        now: DateTime<Utc>,
    ) -> Result<Self::Receipt, LedgerError> {
        let mut intent = load_intent(store, tx, self.request.intent_id).await?;

        if intent.status == IntentStatus::Pending && intent.is_expired(now) {
            expire_intent(store, tx, &mut intent).await?;
            return Err(LedgerError::IntentExpired(intent.id));
        }
        match intent.status {
            IntentStatus::Pending => {}
            IntentStatus::Paid => return Err(LedgerError::IntentAlreadyPaid(intent.id)),
            IntentStatus::Expired => return Err(LedgerError::IntentExpired(intent.id)),
            IntentStatus::Cancelled => {
                return Err(LedgerError::IntentNotPayable {
                    status: intent.status,
                })
            }
        }

        let payer_account = store
            .find_account_for_wallet(tx, self.identity.wallet_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Validation("caller wallet has no ledger account".to_string())
            })?;
        if payer_account.id == intent.payee_account_id {
            return Err(LedgerError::ForbiddenScope(
                "an intent cannot be paid by its creator".to_string(),
            ));
        }
        let payer = accounts.require(payer_account.id)?;
        let payee = accounts.require(intent.payee_account_id)?;
        if payer.status == AccountStatus::Frozen {
            return Err(LedgerError::AccountFrozen(payer.id));
        }
        if payee.status == AccountStatus::Frozen {
            return Err(LedgerError::AccountFrozen(payee.id));
        }
        if payer.currency != intent.amount.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: intent.amount.currency,
                actual: payer.currency,
            });
        }

        let balances = store.sum_buckets(tx, payer.id).await?;
        if balances.available < intent.amount.minor_units {
            return Err(LedgerError::InsufficientFunds {
                available: balances.available,
                required: intent.amount.minor_units,
            });
        }

        let draft = EntryDraft::new(
            EntryKind::IntentPay,
            self.identity.wallet_id,
            intent_pay_lines(payer.id, payee.id, intent.amount),
        )?
        .with_reference(Some(intent.id.to_string()))
        .with_idempotency_key(self.key.as_str().to_string());
        let entry = store.insert_entry(tx, draft).await?;

        intent.status = IntentStatus::Paid;
        intent.payer_account_id = Some(payer.id);
        intent.paid_entry_id = Some(entry.id);
        store.update_intent(tx, &intent).await?;

        tracing::info!(
            intent_id = %intent.id,
            entry_id = %entry.id,
            amount = %intent.amount,
            "payment intent paid"
        );

        Ok(IntentPayReceipt {
            entry_id: entry.id,
            intent_id: intent.id,
            payer_wallet_id: self.identity.wallet_id,
            amount: intent.amount,
            created_at: entry.created_at,
        })
    }
}

pub(crate) struct IntentCancelOp {
    pub identity: ApiKeyIdentity,
    pub request: IntentCancelRequest,
}

#[async_trait]
impl<S: LedgerStore> LedgerOperation<S> for IntentCancelOp {
    type Receipt = IntentCancelReceipt;

    fn name(&self) -> &'static str {
        "intent_cancel"
    }

    fn scope(&self) -> Scope {
        Scope::IntentCreate
    }

    async fn plan(&self, store: &S, tx: &mut S::Tx) -> Result<OperationPlan, LedgerError> {
        let intent = load_intent(store, tx, self.request.intent_id).await?;
        Ok(OperationPlan {
            locks: vec![intent.payee_account_id],
            spend: None,
        })
    }

    async fn apply(
        &self,
        store: &S,
        tx: &mut S::Tx,
        accounts: &LockedAccounts,
        now: DateTime<Utc>,
    ) -> Result<Self::Receipt, LedgerError> {
        let mut intent = load_intent(store, tx, self.request.intent_id).await?;

        let payee = accounts.require(intent.payee_account_id)?;
        if payee.wallet_id != self.identity.wallet_id {
            return Err(LedgerError::ForbiddenScope(
                "only the intent's creator can cancel it".to_string(),
            ));
        }

        if intent.status == IntentStatus::Pending && intent.is_expired(now) {
            expire_intent(store, tx, &mut intent).await?;
            return Err(LedgerError::IntentExpired(intent.id));
        }
        match intent.status {
            IntentStatus::Pending => {}
            IntentStatus::Paid => return Err(LedgerError::IntentAlreadyPaid(intent.id)),
            IntentStatus::Expired => return Err(LedgerError::IntentExpired(intent.id)),
            IntentStatus::Cancelled => {
                return Err(LedgerError::IntentNotPayable {
                    status: intent.status,
                })
            }
        }

        intent.status = IntentStatus::Cancelled;
        store.update_intent(tx, &intent).await?;

        tracing::info!(intent_id = %intent.id, "payment intent cancelled");

        Ok(IntentCancelReceipt {
            intent_id: intent.id,
            status: intent.status,
        })
    }
}
