//! Hold lifecycle: create, capture, release, and lazy expiry.
//!
//! A hold debits the payer's available bucket into the held bucket. Captures
//! move held funds to a payee in one or more steps; a release returns the
//! remainder. Expiry is materialized lazily: the first capture or release
//! that touches a lapsed hold posts the release entry for the remainder,
//! marks the hold EXPIRED, and fails with `HOLD_EXPIRED`, all committed
//! together with the failure record so retries replay the same outcome.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tesoro_shared::types::{EntryId, HoldId, WalletId};
use tesoro_shared::{ApiKeyIdentity, Money, Scope};

use crate::idempotency::IdempotencyKey;
use crate::ledger::executor::{LedgerOperation, LockedAccounts, OperationPlan, SpendCheck};
use crate::ledger::posting::{capture_lines, hold_lines, release_lines, EntryDraft};
use crate::ledger::types::{AccountStatus, EntryKind, Hold, HoldStatus};
use crate::ledger::LedgerError;
use crate::recipient::{self, RecipientRef};
use crate::store::LedgerStore;

/// Longest accepted hold lifetime, per the API contract.
pub const MAX_EXPIRES_IN_SECONDS: i64 = 86_400;

/// A hold-create request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldCreateRequest {
    /// Amount to reserve.
    pub amount: Money,
    /// Lifetime in seconds, `1..=86400`.
    pub expires_in_seconds: i64,
    /// Opaque metadata stored on the entry.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl HoldCreateRequest {
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

/// The durable result of creating a hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldReceipt {
    /// The hold's id.
    pub hold_id: HoldId,
    /// The entry that reserved the funds.
    pub entry_id: EntryId,
    /// Reserved amount.
    pub amount: Money,
    /// Uncaptured remainder.
    pub remaining: Money,
    /// Lifecycle state.
    pub status: HoldStatus,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A capture request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldCaptureRequest {
    /// The hold to capture from.
    pub hold_id: HoldId,
    /// Where the captured funds go.
    pub to: RecipientRef,
    /// Amount to capture; defaults to the full remainder.
    pub amount: Option<Money>,
}

impl HoldCaptureRequest {
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

/// The durable result of a capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureReceipt {
    /// The capture entry.
    pub entry_id: EntryId,
    /// The hold captured from.
    pub hold_id: HoldId,
    /// Receiving wallet.
    pub to_wallet_id: WalletId,
    /// Amount captured by this call.
    pub captured: Money,
    /// Remainder left on the hold.
    pub remaining: Money,
    /// Hold state after the capture.
    pub status: HoldStatus,
    /// Posting timestamp.
    pub created_at: DateTime<Utc>,
}

/// A release request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldReleaseRequest {
    /// The hold to release.
    pub hold_id: HoldId,
}

/// The durable result of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReceipt {
    /// The release entry.
    pub entry_id: EntryId,
    /// The released hold.
    pub hold_id: HoldId,
    /// Amount returned to available.
    pub released: Money,
    /// Hold state after the release.
    pub status: HoldStatus,
    /// Posting timestamp.
    pub created_at: DateTime<Utc>,
}

/// Loads a hold and proves it belongs to the calling wallet.
async fn load_owned_hold<S: LedgerStore>(
    store: &S,
    tx: &mut S::Tx,
    identity: &ApiKeyIdentity,
    hold_id: HoldId,
) -> Result<Hold, LedgerError> {
    let hold = store
        .find_hold(tx, hold_id)
        .await?
        .ok_or(LedgerError::HoldNotFound(hold_id))?;
    let payer = store
        .find_account(tx, hold.account_id)
        .await?
        .ok_or_else(|| LedgerError::Store("hold references a missing account".to_string()))?;
    if payer.wallet_id != identity.wallet_id {
        return Err(LedgerError::ForbiddenScope(
            "hold does not belong to the calling wallet".to_string(),
        ));
    }
    Ok(hold)
}

/// Materializes lazy expiry: posts the release entry for the remainder and
/// marks the hold EXPIRED. Runs under the payer's account lock. The caller
/// returns `HoldExpired`, which commits this posting with the failure
/// record.
async fn expire_hold<S: LedgerStore>(
    store: &S,
    tx: &mut S::Tx,
    initiator: WalletId,
    hold: &mut Hold,
) -> Result<(), LedgerError> {
    if hold.remaining.is_positive() {
        let draft = EntryDraft::new(
            EntryKind::Release,
            initiator,
            release_lines(hold.account_id, hold.remaining),
        )?
        .with_link(hold.entry_id);
        store.insert_entry(tx, draft).await?;
    }
    hold.remaining = Money::zero(hold.remaining.currency);
    hold.status = HoldStatus::Expired;
    store.update_hold(tx, hold).await?;
    tracing::info!(hold_id = %hold.id, "hold expired lazily on access");
    Ok(())
}

pub(crate) struct HoldCreateOp {
    pub identity: ApiKeyIdentity,
    pub key: IdempotencyKey,
    pub request: HoldCreateRequest,
}

#[async_trait]
impl<S: LedgerStore> LedgerOperation<S> for HoldCreateOp {
    type Receipt = HoldReceipt;

    fn name(&self) -> &'static str {
        "hold_create"
    }

    fn scope(&self) -> Scope {
        Scope::Hold
    }

    async fn plan(&self, store: &S, tx: &mut S::Tx) -> Result<OperationPlan, LedgerError> {
        let payer = store
            .find_account_for_wallet(tx, self.identity.wallet_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Validation("caller wallet has no ledger account".to_string())
            })?;
        Ok(OperationPlan {
            locks: vec![payer.id],
            spend: Some(SpendCheck {
                payer: payer.id,
                amount: self.request.amount,
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
        let payer = accounts
            .iter()
            .map(|(_, account)| account)
            .next()
            .ok_or_else(|| {
                LedgerError::InvariantViolation("payer missing from lock set".to_string())
            })?;

        if payer.status == AccountStatus::Frozen {
            return Err(LedgerError::AccountFrozen(payer.id));
        }
        if payer.currency != self.request.amount.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: payer.currency,
                actual: self.request.amount.currency,
            });
        }

        let balances = store.sum_buckets(tx, payer.id).await?;
        if balances.available < self.request.amount.minor_units {
            return Err(LedgerError::InsufficientFunds {
                available: balances.available,
                required: self.request.amount.minor_units,
            });
        }

        let draft = EntryDraft::new(
            EntryKind::Hold,
            self.identity.wallet_id,
            hold_lines(payer.id, self.request.amount),
        )?
        .with_metadata(self.request.metadata.clone())
        .with_idempotency_key(self.key.as_str().to_string());
        let entry = store.insert_entry(tx, draft).await?;

        let hold = Hold {
            id: HoldId::new(),
            account_id: payer.id,
            amount: self.request.amount,
            remaining: self.request.amount,
            status: HoldStatus::Active,
            expires_at: now + Duration::seconds(self.request.expires_in_seconds),
            entry_id: entry.id,
            created_at: entry.created_at,
        };
        store.insert_hold(tx, hold.clone()).await?;

        tracing::info!(
            hold_id = %hold.id,
            entry_id = %entry.id,
            amount = %hold.amount,
            expires_at = %hold.expires_at,
            "hold created"
        );

        Ok(HoldReceipt {
            hold_id: hold.id,
            entry_id: entry.id,
            amount: hold.amount,
            remaining: hold.remaining,
            status: hold.status,
            expires_at: hold.expires_at,
            created_at: hold.created_at,
        })
    }
}

pub(crate) struct HoldCaptureOp {
    pub identity: ApiKeyIdentity,
    pub key: IdempotencyKey,
    pub request: HoldCaptureRequest,
}

#[async_trait]
impl<S: LedgerStore> LedgerOperation<S> for HoldCaptureOp {
    type Receipt = CaptureReceipt;

    fn name(&self) -> &'static str {
        "hold_capture"
    }

    fn scope(&self) -> Scope {
        Scope::Capture
    }

    async fn plan(&self, store: &S, tx: &mut S::Tx) -> Result<OperationPlan, LedgerError> {
        let hold = load_owned_hold(store, tx, &self.identity, self.request.hold_id).await?;
        let payee = recipient::resolve(
            store,
            tx,
            &self.request.to,
            Some(hold.amount.currency),
        )
        .await?;
        if payee.account.id == hold.account_id {
            return Err(LedgerError::Validation(
                "cannot capture a hold back to its own wallet; release it instead".to_string(),
            ));
        }

        Ok(OperationPlan {
            locks: vec![hold.account_id, payee.account.id],
            // Held funds were already charged against the ceiling when the
            // hold was created.
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
        let mut hold = load_owned_hold(store, tx, &self.identity, self.request.hold_id).await?;

        if hold.status.can_capture() && hold.is_expired(now) {
            expire_hold(store, tx, self.identity.wallet_id, &mut hold).await?;
            return Err(LedgerError::HoldExpired(hold.id));
        }
        if !hold.status.can_capture() {
            if hold.status == HoldStatus::Expired {
                return Err(LedgerError::HoldExpired(hold.id));
            }
            return Err(LedgerError::HoldNotActive {
                status: hold.status,
            });
        }

        let capture_amount = self.request.amount.unwrap_or(hold.remaining);
        if capture_amount.currency != hold.remaining.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: hold.remaining.currency,
                actual: capture_amount.currency,
            });
        }
        if capture_amount.minor_units > hold.remaining.minor_units {
            return Err(LedgerError::CaptureExceedsHold {
                requested: capture_amount.minor_units,
                remaining: hold.remaining.minor_units,
            });
        }

        let payee = accounts
            .iter()
            .map(|(_, account)| account)
            .find(|account| account.id != hold.account_id)
            .ok_or_else(|| {
                LedgerError::InvariantViolation("payee missing from lock set".to_string())
            })?;
        if payee.status == AccountStatus::Frozen {
            return Err(LedgerError::AccountFrozen(payee.id));
        }

        let draft = EntryDraft::new(
            EntryKind::Capture,
            self.identity.wallet_id,
            capture_lines(hold.account_id, payee.id, capture_amount),
        )?
        .with_link(hold.entry_id)
        .with_idempotency_key(self.key.as_str().to_string());
        let entry = store.insert_entry(tx, draft).await?;

        hold.remaining = hold.remaining.checked_sub(capture_amount).map_err(|_| {
            LedgerError::Arithmetic
        })?;
        hold.status = if hold.remaining.is_zero() {
            HoldStatus::Captured
        } else {
            HoldStatus::PartiallyCaptured
        };
        store.update_hold(tx, &hold).await?;

        tracing::info!(
            hold_id = %hold.id,
            entry_id = %entry.id,
            captured = %capture_amount,
            remaining = %hold.remaining,
            "hold captured"
        );

        Ok(CaptureReceipt {
            entry_id: entry.id,
            hold_id: hold.id,
            to_wallet_id: payee.wallet_id,
            captured: capture_amount,
            remaining: hold.remaining,
            status: hold.status,
            created_at: entry.created_at,
        })
    }
}

pub(crate) struct HoldReleaseOp {
    pub identity: ApiKeyIdentity,
    pub key: IdempotencyKey,
    pub request: HoldReleaseRequest,
}

#[async_trait]
impl<S: LedgerStore> LedgerOperation<S> for HoldReleaseOp {
    type Receipt = ReleaseReceipt;

    fn name(&self) -> &'static str {
        "hold_release"
    }

    fn scope(&self) -> Scope {
        Scope::Hold
    }

    async fn plan(&self, store: &S, tx: &mut S::Tx) -> Result<OperationPlan, LedgerError> {
        let hold = load_owned_hold(store, tx, &self.identity, self.request.hold_id).await?;
        Ok(OperationPlan {
            locks: vec![hold.account_id],
            spend: None,
        })
    }

    async fn apply(
        &self,
        store: &S,
        tx: &mut S::Tx,
        _accounts: &LockedAccounts,
        now: DateTime<Utc>,
    ) -> Result<Self::Receipt, LedgerError> {
        let mut hold = load_owned_hold(store, tx, &self.identity, self.request.hold_id).await?;

        if hold.status.can_release() && hold.is_expired(now) {
            expire_hold(store, tx, self.identity.wallet_id, &mut hold).await?;
            return Err(LedgerError::HoldExpired(hold.id));
        }
        if !hold.status.can_release() {
            if hold.status == HoldStatus::Expired {
                return Err(LedgerError::HoldExpired(hold.id));
            }
            return Err(LedgerError::HoldNotActive {
                status: hold.status,
            });
        }

        let released = hold.remaining;
        let draft = EntryDraft::new(
            EntryKind::Release,
            self.identity.wallet_id,
            release_lines(hold.account_id, released),
        )?
        .with_link(hold.entry_id)
        .with_idempotency_key(self.key.as_str().to_string());
        let entry = store.insert_entry(tx, draft).await?;

        hold.remaining = Money::zero(released.currency);
        hold.status = HoldStatus::Released;
        store.update_hold(tx, &hold).await?;

        tracing::info!(
            hold_id = %hold.id,
            entry_id = %entry.id,
            released = %released,
            "hold released"
        );

        Ok(ReleaseReceipt {
            entry_id: entry.id,
            hold_id: hold.id,
            released,
            status: hold.status,
            created_at: entry.created_at,
        })
    }
}
