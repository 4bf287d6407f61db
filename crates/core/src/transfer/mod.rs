//! Transfers and deposits.
//!
//! A transfer moves available funds between two wallets. A deposit credits a
//! wallet from the system treasury, the counter-side of money arriving from
//! outside the platform; the treasury is a SYSTEM account and may go
//! negative.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tesoro_shared::types::{AccountId, EntryId, WalletId};
use tesoro_shared::{ApiKeyIdentity, Money, Scope};

use crate::idempotency::IdempotencyKey;
use crate::ledger::executor::{
    LedgerOperation, LockedAccounts, OperationPlan, SpendCheck,
};
use crate::ledger::posting::{deposit_lines, transfer_lines, EntryDraft};
use crate::ledger::types::{AccountStatus, AccountType, EntryKind};
use crate::ledger::LedgerError;
use crate::recipient::{self, RecipientRef};
use crate::store::LedgerStore;

/// Handle of the wallet backing deposits.
pub const TREASURY_HANDLE: &str = "@treasury";

/// A transfer request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// The recipient.
    pub to: RecipientRef,
    /// Amount to move.
    pub amount: Money,
    /// Optional client reference echoed on the entry.
    pub reference_id: Option<String>,
    /// Opaque metadata stored on the entry.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TransferRequest {
    /// Shape validation performed before the idempotency reservation.
    ///
    /// # Errors
    ///
    /// `Validation` for non-positive amounts.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !self.amount.is_positive() {
            return Err(LedgerError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The durable result of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// The posted entry.
    pub entry_id: EntryId,
    /// Paying wallet.
    pub from_wallet_id: WalletId,
    /// Receiving wallet.
    pub to_wallet_id: WalletId,
    /// Amount moved.
    pub amount: Money,
    /// Echoed client reference.
    pub reference_id: Option<String>,
    /// Posting timestamp.
    pub created_at: DateTime<Utc>,
}

pub(crate) struct TransferOp {
    pub identity: ApiKeyIdentity,
    pub key: IdempotencyKey,
    pub request: TransferRequest,
}

impl TransferOp {
    async fn payer_account<S: LedgerStore>(
        &self,
        store: &S,
        tx: &mut S::Tx,
    ) -> Result<(AccountId, WalletId), LedgerError> {
        let account = store
            .find_account_for_wallet(tx, self.identity.wallet_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Validation("caller wallet has no ledger account".to_string())
            })?;
        Ok((account.id, account.wallet_id))
    }
}

#[async_trait]
impl<S: LedgerStore> LedgerOperation<S> for TransferOp {
    type Receipt = TransferReceipt;

    fn name(&self) -> &'static str {
        "transfer"
    }

    fn scope(&self) -> Scope {
        Scope::Transfer
    }

    async fn plan(&self, store: &S, tx: &mut S::Tx) -> Result<OperationPlan, LedgerError> {
        let (payer_account, payer_wallet) = self.payer_account(store, tx).await?;
        let payee = recipient::resolve(
            store,
            tx,
            &self.request.to,
            Some(self.request.amount.currency),
        )
        .await?;

        if payee.wallet.id == payer_wallet {
            return Err(LedgerError::SelfTransfer);
        }

        Ok(OperationPlan {
            locks: vec![payer_account, payee.account.id],
            spend: Some(SpendCheck {
                payer: payer_account,
                amount: self.request.amount,
            }),
        })
    }

    async fn apply(
        &self,
        store: &S,
        tx: &mut S::Tx,
        accounts: &LockedAccounts,
        _now: DateTime<Utc>,
    ) -> Result<Self::Receipt, LedgerError> {
        let (payer_account_id, _) = self.payer_account(store, tx).await?;
        let payer = accounts.require(payer_account_id)?;
        let payee = accounts
            .iter()
            .map(|(_, account)| account)
            .find(|account| account.id != payer_account_id)
            .ok_or_else(|| {
                LedgerError::InvariantViolation("payee account missing from lock set".to_string())
            })?;

        if payer.status == AccountStatus::Frozen {
            return Err(LedgerError::AccountFrozen(payer.id));
        }
        if payee.status == AccountStatus::Frozen {
            return Err(LedgerError::AccountFrozen(payee.id));
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
            EntryKind::Transfer,
            self.identity.wallet_id,
            transfer_lines(payer.id, payee.id, self.request.amount),
        )?
        .with_reference(self.request.reference_id.clone())
        .with_metadata(self.request.metadata.clone())
        .with_idempotency_key(self.key.as_str().to_string());

        let entry = store.insert_entry(tx, draft).await?;

        tracing::info!(
            entry_id = %entry.id,
            from = %self.identity.wallet_id,
            to = %payee.wallet_id,
            amount = %self.request.amount,
            "transfer posted"
        );

        Ok(TransferReceipt {
            entry_id: entry.id,
            from_wallet_id: self.identity.wallet_id,
            to_wallet_id: payee.wallet_id,
            amount: self.request.amount,
            reference_id: entry.reference_id,
            created_at: entry.created_at,
        })
    }
}

/// An admin deposit request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    /// The wallet to credit.
    pub to: RecipientRef,
    /// Amount to credit.
    pub amount: Money,
    /// Reference from the external payment system.
    pub reference_id: Option<String>,
    /// Opaque metadata stored on the entry.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DepositRequest {
    /// Shape validation performed before the idempotency reservation.
    ///
    /// # Errors
    ///
    /// `Validation` for non-positive amounts.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !self.amount.is_positive() {
            return Err(LedgerError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The durable result of a deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    /// The posted entry.
    pub entry_id: EntryId,
    /// Credited wallet.
    pub to_wallet_id: WalletId,
    /// Amount credited.
    pub amount: Money,
    /// Echoed external reference.
    pub reference_id: Option<String>,
    /// Posting timestamp.
    pub created_at: DateTime<Utc>,
}

pub(crate) struct DepositOp {
    pub identity: ApiKeyIdentity,
    pub key: IdempotencyKey,
    pub request: DepositRequest,
}

#[async_trait]
impl<S: LedgerStore> LedgerOperation<S> for DepositOp {
    type Receipt = DepositReceipt;

    fn name(&self) -> &'static str {
        "deposit"
    }

    fn scope(&self) -> Scope {
        Scope::Admin
    }

    async fn plan(&self, store: &S, tx: &mut S::Tx) -> Result<OperationPlan, LedgerError> {
        let treasury = store
            .find_wallet_by_handle(tx, TREASURY_HANDLE)
            .await?
            .ok_or_else(|| {
                LedgerError::Store(format!("treasury wallet {TREASURY_HANDLE} is not seeded"))
            })?;
        let treasury_account = store
            .find_account_for_wallet(tx, treasury.id)
            .await?
            .ok_or_else(|| LedgerError::Store("treasury wallet has no account".to_string()))?;
        if treasury_account.account_type != AccountType::System {
            return Err(LedgerError::Store(
                "treasury account is not a system account".to_string(),
            ));
        }

        let target = recipient::resolve(
            store,
            tx,
            &self.request.to,
            Some(self.request.amount.currency),
        )
        .await?;
        if target.account.id == treasury_account.id {
            return Err(LedgerError::Validation(
                "cannot deposit to the treasury".to_string(),
            ));
        }

        Ok(OperationPlan {
            locks: vec![treasury_account.id, target.account.id],
            spend: None,
        })
    }

    async fn apply(
        &self,
        store: &S,
        tx: &mut S::Tx,
        accounts: &LockedAccounts,
        _now: DateTime<Utc>,
    ) -> Result<Self::Receipt, LedgerError> {
        let mut treasury = None;
        let mut target = None;
        for (_, account) in accounts.iter() {
            if account.account_type == AccountType::System {
                treasury = Some(account);
            } else {
                target = Some(account);
            }
        }
        let treasury = treasury.ok_or_else(|| {
            LedgerError::InvariantViolation("treasury missing from lock set".to_string())
        })?;
        let target = target.ok_or_else(|| {
            LedgerError::InvariantViolation("deposit target missing from lock set".to_string())
        })?;

        if target.status == AccountStatus::Frozen {
            return Err(LedgerError::AccountFrozen(target.id));
        }

        let target_wallet = store
            .find_wallet(tx, target.wallet_id)
            .await?
            .ok_or_else(|| LedgerError::Store("target wallet disappeared".to_string()))?;

        let draft = EntryDraft::new(
            EntryKind::Deposit,
            self.identity.wallet_id,
            deposit_lines(treasury.id, target.id, self.request.amount),
        )?
        .with_reference(self.request.reference_id.clone())
        .with_metadata(self.request.metadata.clone())
        .with_idempotency_key(self.key.as_str().to_string());

        let entry = store.insert_entry(tx, draft).await?;

        tracing::info!(
            entry_id = %entry.id,
            to = %target_wallet.id,
            amount = %self.request.amount,
            "deposit posted"
        );

        Ok(DepositReceipt {
            entry_id: entry.id,
            to_wallet_id: target_wallet.id,
            amount: self.request.amount,
            reference_id: entry.reference_id,
            created_at: entry.created_at,
        })
    }
}
