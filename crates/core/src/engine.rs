//! The engine facade: every ledger operation behind one type.
//!
//! Write operations validate request shape first (malformed input is
//! rejected before the idempotency reservation), then run through the
//! transaction executor. Read operations open a short transaction, derive
//! their answer, and roll back.

use std::sync::Arc;

use chrono::Utc;

use tesoro_shared::config::LedgerConfig;
use tesoro_shared::types::{AccountId, EntryId, WalletId};
use tesoro_shared::{ApiKeyIdentity, Scope};

use crate::authz;
use crate::hold::{
    CaptureReceipt, HoldCaptureOp, HoldCaptureRequest, HoldCreateOp, HoldCreateRequest,
    HoldReceipt, HoldReleaseOp, HoldReleaseRequest, ReleaseReceipt,
};
use crate::idempotency::{Fingerprint, IdempotencyKey};
use crate::intent::{
    IntentCancelOp, IntentCancelReceipt, IntentCancelRequest, IntentCreateOp, IntentCreateRequest,
    IntentPayOp, IntentPayReceipt, IntentPayRequest, IntentReceipt,
};
use crate::ledger::executor::{ExecutorConfig, TransactionExecutor};
use crate::ledger::types::{Account, AccountStatus, AccountType, Wallet};
use crate::ledger::LedgerError;
use crate::recipient::{self, RecipientRef};
use crate::refund::{RefundOp, RefundReceipt, RefundRequest};
use crate::store::{LedgerStore, NewWallet};
use crate::transfer::{
    DepositOp, DepositReceipt, DepositRequest, TransferOp, TransferReceipt, TransferRequest,
};
use crate::wallet::{
    BalanceReport, CreateWalletRequest, EntryView, RecipientInfo, WalletCreated,
};
use tesoro_shared::types::pagination::{CursorPage, PageLimit};

/// The ledger engine.
pub struct LedgerEngine<S: LedgerStore> {
    store: Arc<S>,
    executor: TransactionExecutor<S>,
}

impl<S: LedgerStore> LedgerEngine<S> {
    /// Builds an engine over a store with the given tuning.
    pub fn new(store: Arc<S>, config: &LedgerConfig) -> Self {
        let executor = TransactionExecutor::new(Arc::clone(&store), ExecutorConfig::from(config));
        Self { store, executor }
    }

    // ========================================================================
    // Money movement
    // ========================================================================

    /// Transfers available funds to another wallet.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`]; insufficient funds, recipient resolution, and
    /// idempotency conflicts are the common cases.
    pub async fn transfer(
        &self,
        identity: &ApiKeyIdentity,
        idempotency_key: &str,
        request: TransferRequest,
    ) -> Result<TransferReceipt, LedgerError> {
        request.validate()?;
        let key = IdempotencyKey::parse(idempotency_key)?;
        let fingerprint = Fingerprint::of("transfer", &request)?;
        let op = TransferOp {
            identity: identity.clone(),
            key: key.clone(),
            request,
        };
        self.executor.execute(identity, &key, &fingerprint, &op).await
    }

    /// Credits a wallet from the system treasury. Admin-scoped.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn deposit(
        &self,
        identity: &ApiKeyIdentity,
        idempotency_key: &str,
        request: DepositRequest,
    ) -> Result<DepositReceipt, LedgerError> {
        request.validate()?;
        let key = IdempotencyKey::parse(idempotency_key)?;
        let fingerprint = Fingerprint::of("deposit", &request)?;
        let op = DepositOp {
            identity: identity.clone(),
            key: key.clone(),
            request,
        };
        self.executor.execute(identity, &key, &fingerprint, &op).await
    }

    /// Reserves available funds on the caller's account.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn hold_create(
        &self,
        identity: &ApiKeyIdentity,
        idempotency_key: &str,
        request: HoldCreateRequest,
    ) -> Result<HoldReceipt, LedgerError> {
        request.validate()?;
        let key = IdempotencyKey::parse(idempotency_key)?;
        let fingerprint = Fingerprint::of("hold_create", &request)?;
        let op = HoldCreateOp {
            identity: identity.clone(),
            key: key.clone(),
            request,
        };
        self.executor.execute(identity, &key, &fingerprint, &op).await
    }

    /// Captures part or all of a hold to a recipient.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn hold_capture(
        &self,
        identity: &ApiKeyIdentity,
        idempotency_key: &str,
        request: HoldCaptureRequest,
    ) -> Result<CaptureReceipt, LedgerError> {
        request.validate()?;
        let key = IdempotencyKey::parse(idempotency_key)?;
        let fingerprint = Fingerprint::of("hold_capture", &request)?;
        let op = HoldCaptureOp {
            identity: identity.clone(),
            key: key.clone(),
            request,
        };
        self.executor.execute(identity, &key, &fingerprint, &op).await
    }

    /// Releases a hold's remainder back to available funds.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn hold_release(
        &self,
        identity: &ApiKeyIdentity,
        idempotency_key: &str,
        request: HoldReleaseRequest,
    ) -> Result<ReleaseReceipt, LedgerError> {
        let key = IdempotencyKey::parse(idempotency_key)?;
        let fingerprint = Fingerprint::of("hold_release", &request)?;
        let op = HoldReleaseOp {
            identity: identity.clone(),
            key: key.clone(),
            request,
        };
        self.executor.execute(identity, &key, &fingerprint, &op).await
    }

    /// Creates a payment intent for the caller's wallet.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn intent_create(
        &self,
        identity: &ApiKeyIdentity,
        idempotency_key: &str,
        request: IntentCreateRequest,
    ) -> Result<IntentReceipt, LedgerError> {
        request.validate()?;
        let key = IdempotencyKey::parse(idempotency_key)?;
        let fingerprint = Fingerprint::of("intent_create", &request)?;
        let op = IntentCreateOp {
            identity: identity.clone(),
            request,
        };
        self.executor.execute(identity, &key, &fingerprint, &op).await
    }

    /// Pays a pending payment intent from the caller's wallet.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn intent_pay(
        &self,
        identity: &ApiKeyIdentity,
        idempotency_key: &str,
        request: IntentPayRequest,
    ) -> Result<IntentPayReceipt, LedgerError> {
        let key = IdempotencyKey::parse(idempotency_key)?;
        let fingerprint = Fingerprint::of("intent_pay", &request)?;
        let op = IntentPayOp {
            identity: identity.clone(),
            key: key.clone(),
            request,
        };
        self.executor.execute(identity, &key, &fingerprint, &op).await
    }

    /// Cancels a pending intent. Creator only.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn intent_cancel(
        &self,
        identity: &ApiKeyIdentity,
        idempotency_key: &str,
        request: IntentCancelRequest,
    ) -> Result<IntentCancelReceipt, LedgerError> {
        let key = IdempotencyKey::parse(idempotency_key)?;
        let fingerprint = Fingerprint::of("intent_cancel", &request)?;
        let op = IntentCancelOp {
            identity: identity.clone(),
            request,
        };
        self.executor.execute(identity, &key, &fingerprint, &op).await
    }

    /// Refunds a capture, fully or partially.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn refund(
        &self,
        identity: &ApiKeyIdentity,
        idempotency_key: &str,
        request: RefundRequest,
    ) -> Result<RefundReceipt, LedgerError> {
        request.validate()?;
        let key = IdempotencyKey::parse(idempotency_key)?;
        let fingerprint = Fingerprint::of("refund", &request)?;
        let op = RefundOp {
            identity: identity.clone(),
            key: key.clone(),
            request,
        };
        self.executor.execute(identity, &key, &fingerprint, &op).await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Derives the caller's balances.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn balance(&self, identity: &ApiKeyIdentity) -> Result<BalanceReport, LedgerError> {
        authz::require_scope(identity, Scope::Read)?;
        let mut tx = self.store.begin().await?;
        let result = self.balance_in(&mut tx, identity.wallet_id).await;
        let _ = self.store.rollback(tx).await;
        result
    }

    async fn balance_in(
        &self,
        tx: &mut S::Tx,
        wallet_id: WalletId,
    ) -> Result<BalanceReport, LedgerError> {
        let account = self
            .store
            .find_account_for_wallet(tx, wallet_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Validation("caller wallet has no ledger account".to_string())
            })?;
        let balances = self.store.sum_buckets(tx, account.id).await?;
        Ok(BalanceReport {
            wallet_id,
            available: balances.available,
            held: balances.held,
            total: balances.total()?,
            currency: balances.currency,
        })
    }

    /// Lists the caller's transaction history, newest first.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`]; a malformed cursor is `Validation`.
    pub async fn list_transactions(
        &self,
        identity: &ApiKeyIdentity,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<CursorPage<EntryView>, LedgerError> {
        authz::require_scope(identity, Scope::Read)?;
        let limit = PageLimit::clamp(limit);
        let cursor = cursor
            .map(|raw| {
                raw.parse::<EntryId>()
                    .map_err(|_| LedgerError::Validation(format!("malformed cursor: {raw}")))
            })
            .transpose()?;

        let mut tx = self.store.begin().await?;
        let result = self
            .list_transactions_in(&mut tx, identity.wallet_id, cursor, limit)
            .await;
        let _ = self.store.rollback(tx).await;
        result
    }

    async fn list_transactions_in(
        &self,
        tx: &mut S::Tx,
        wallet_id: WalletId,
        cursor: Option<EntryId>,
        limit: PageLimit,
    ) -> Result<CursorPage<EntryView>, LedgerError> {
        let account = self
            .store
            .find_account_for_wallet(tx, wallet_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Validation("caller wallet has no ledger account".to_string())
            })?;

        let entries = self
            .store
            .list_entries_for_account(tx, account.id, cursor, limit.get())
            .await?;

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let lines = self.store.lines_for_entry(tx, entry.id).await?;
            items.push(EntryView::project(entry, &lines, account.id));
        }

        Ok(CursorPage::new(items, limit, |view| {
            view.entry_id.to_string()
        }))
    }

    /// Resolves a recipient reference without moving money.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn resolve_recipient(
        &self,
        identity: &ApiKeyIdentity,
        to: &str,
    ) -> Result<RecipientInfo, LedgerError> {
        authz::require_scope(identity, Scope::Read)?;
        let reference = RecipientRef::parse(to)?;

        let mut tx = self.store.begin().await?;
        let result = recipient::resolve(&*self.store, &mut tx, &reference, None).await;
        let _ = self.store.rollback(tx).await;

        let resolved = result?;
        Ok(RecipientInfo {
            wallet_id: resolved.wallet.id,
            handle: resolved.wallet.handle,
            display_name: resolved.wallet.display_name,
            account_type: resolved.account.account_type,
            currency: resolved.account.currency,
        })
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Creates a wallet with its ledger account. Admin-scoped.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`]; a taken handle is `Validation`.
    pub async fn create_wallet(
        &self,
        identity: &ApiKeyIdentity,
        request: CreateWalletRequest,
    ) -> Result<WalletCreated, LedgerError> {
        authz::require_scope(identity, Scope::Admin)?;
        request.validate()?;

        let mut tx = self.store.begin().await?;

        if let Some(handle) = &request.handle {
            if self
                .store
                .find_wallet_by_handle(&mut tx, handle)
                .await?
                .is_some()
            {
                let _ = self.store.rollback(tx).await;
                return Err(LedgerError::Validation(format!(
                    "handle {handle} is already in use"
                )));
            }
        }

        let now = Utc::now();
        let wallet = Wallet {
            id: WalletId::new(),
            handle: request.handle.clone(),
            display_name: request.display_name.clone(),
            created_at: now,
        };
        let account = Account {
            id: AccountId::new(),
            wallet_id: wallet.id,
            currency: request.currency,
            account_type: request.account_type,
            status: AccountStatus::Active,
            created_at: now,
        };
        let created = WalletCreated {
            wallet_id: wallet.id,
            account_id: account.id,
            handle: wallet.handle.clone(),
            currency: account.currency,
        };

        self.store
            .insert_wallet(&mut tx, NewWallet { wallet, account })
            .await?;
        self.store.commit(tx).await?;

        tracing::info!(
            wallet_id = %created.wallet_id,
            handle = created.handle.as_deref().unwrap_or("-"),
            "wallet created"
        );
        Ok(created)
    }

    /// Maps an external identity onto a wallet. Admin-scoped.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn link_external_identity(
        &self,
        identity: &ApiKeyIdentity,
        wallet_id: WalletId,
        provider: &str,
        reference: &str,
    ) -> Result<(), LedgerError> {
        authz::require_scope(identity, Scope::Admin)?;
        if provider.trim().is_empty() || reference.trim().is_empty() {
            return Err(LedgerError::Validation(
                "provider and reference must not be empty".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        if self.store.find_wallet(&mut tx, wallet_id).await?.is_none() {
            let _ = self.store.rollback(tx).await;
            return Err(LedgerError::RecipientNotFound(wallet_id.to_string()));
        }
        self.store
            .insert_external_identity(&mut tx, provider, reference, wallet_id)
            .await?;
        self.store.commit(tx).await?;
        Ok(())
    }

    /// Freezes or unfreezes an account. Admin-scoped.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn set_account_frozen(
        &self,
        identity: &ApiKeyIdentity,
        account_id: AccountId,
        frozen: bool,
    ) -> Result<AccountStatus, LedgerError> {
        authz::require_scope(identity, Scope::Admin)?;
        let status = if frozen {
            AccountStatus::Frozen
        } else {
            AccountStatus::Active
        };

        let mut tx = self.store.begin().await?;
        if self
            .store
            .find_account(&mut tx, account_id)
            .await?
            .is_none()
        {
            let _ = self.store.rollback(tx).await;
            return Err(LedgerError::RecipientNotFound(account_id.to_string()));
        }
        self.store
            .set_account_status(&mut tx, account_id, status)
            .await?;
        self.store.commit(tx).await?;

        tracing::info!(account_id = %account_id, status = ?status, "account status changed");
        Ok(status)
    }

    /// Exposes the account type of a wallet for adapters that need it.
    ///
    /// # Errors
    ///
    /// See [`LedgerError`].
    pub async fn account_for_wallet(
        &self,
        wallet_id: WalletId,
    ) -> Result<Option<(AccountId, AccountType)>, LedgerError> {
        let mut tx = self.store.begin().await?;
        let account = self.store.find_account_for_wallet(&mut tx, wallet_id).await;
        let _ = self.store.rollback(tx).await;
        Ok(account?.map(|a| (a.id, a.account_type)))
    }
}
