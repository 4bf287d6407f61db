//! The persistence port the ledger engine depends on.
//!
//! The engine never issues SQL. Everything it needs from the backing store
//! is expressed here: transactions with exclusive row locks on accounts,
//! balanced entry insertion, balance sums computed inside the caller's
//! transaction, state-machine reads and updates, and idempotency records.
//!
//! Implementations: [`memory::InMemoryLedgerStore`] for tests and the
//! SeaORM/PostgreSQL store in `tesoro-db` for production.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use tesoro_shared::types::{AccountId, ApiKeyId, EntryId, HoldId, IntentId, WalletId};

use crate::idempotency::{Fingerprint, IdempotencyKey, Snapshot};
use crate::ledger::balance::Balances;
use crate::ledger::error::LedgerError;
use crate::ledger::posting::EntryDraft;
use crate::ledger::types::{
    Account, AccountStatus, Hold, JournalEntry, JournalLine, PaymentIntent, Refund, Wallet,
};

/// Failures surfaced by store implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend detected a serialization conflict; the transaction can be
    /// retried.
    #[error("Serialization conflict: {0}")]
    Serialization(String),

    /// A uniqueness or foreign-key constraint was violated.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// A row the store was asked to update does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the executor may retry the whole transaction.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(msg) => {
                // The executor converts this to TRANSIENT_CONFLICT once the
                // retry budget is spent.
                Self::Store(format!("serialization conflict: {msg}"))
            }
            other => Self::Store(other.to_string()),
        }
    }
}

/// Outcome of an idempotency reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyReservation {
    /// No prior record; an IN_FLIGHT reservation was created.
    Fresh,
    /// A completed record with the same fingerprint exists; replay it.
    Replay(Snapshot),
    /// Same fingerprint, but the original request is still running.
    InFlight,
    /// A record exists with a different fingerprint.
    Mismatch,
}

/// Parameters for creating a wallet with its account.
#[derive(Debug, Clone)]
pub struct NewWallet {
    /// The wallet record.
    pub wallet: Wallet,
    /// The account record owned by the wallet.
    pub account: Account,
}

/// The persistence contract of the ledger engine.
///
/// `Tx` is the store's transaction handle. All reads issued through a `Tx`
/// observe previously committed state plus this transaction's own staged
/// writes; other transactions' uncommitted writes are invisible. Dropping a
/// `Tx` without committing rolls it back.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Transaction handle.
    type Tx: Send;

    /// Starts a transaction with at least read-committed isolation.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Commits the transaction, making all staged writes durable atomically.
    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    /// Rolls the transaction back, discarding staged writes and releasing
    /// locks.
    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;

    // ========== Accounts and wallets ==========

    /// Acquires an exclusive row lock on the account, blocking concurrent
    /// lockers until this transaction ends. Returns the locked row.
    async fn lock_account(
        &self,
        tx: &mut Self::Tx,
        id: AccountId,
    ) -> Result<Account, StoreError>;

    /// Reads an account without locking.
    async fn find_account(
        &self,
        tx: &mut Self::Tx,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError>;

    /// Reads the account owned by a wallet.
    async fn find_account_for_wallet(
        &self,
        tx: &mut Self::Tx,
        wallet_id: WalletId,
    ) -> Result<Option<Account>, StoreError>;

    /// Reads a wallet by id.
    async fn find_wallet(
        &self,
        tx: &mut Self::Tx,
        id: WalletId,
    ) -> Result<Option<Wallet>, StoreError>;

    /// Reads a wallet by its unique handle (normalized, `@`-prefixed).
    async fn find_wallet_by_handle(
        &self,
        tx: &mut Self::Tx,
        handle: &str,
    ) -> Result<Option<Wallet>, StoreError>;

    /// Reads a wallet through an external identity mapping.
    async fn find_wallet_by_external_ref(
        &self,
        tx: &mut Self::Tx,
        provider: &str,
        external_ref: &str,
    ) -> Result<Option<Wallet>, StoreError>;

    /// Inserts a wallet and its account.
    async fn insert_wallet(&self, tx: &mut Self::Tx, new: NewWallet) -> Result<(), StoreError>;

    /// Registers an external identity for a wallet.
    async fn insert_external_identity(
        &self,
        tx: &mut Self::Tx,
        provider: &str,
        external_ref: &str,
        wallet_id: WalletId,
    ) -> Result<(), StoreError>;

    /// Updates an account's status.
    async fn set_account_status(
        &self,
        tx: &mut Self::Tx,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<(), StoreError>;

    // ========== Journal ==========

    /// Inserts an entry with its lines atomically. Unbalanced drafts are
    /// rejected with `Constraint`.
    async fn insert_entry(
        &self,
        tx: &mut Self::Tx,
        draft: EntryDraft,
    ) -> Result<JournalEntry, StoreError>;

    /// Reads an entry by id.
    async fn find_entry(
        &self,
        tx: &mut Self::Tx,
        id: EntryId,
    ) -> Result<Option<JournalEntry>, StoreError>;

    /// Reads the lines of an entry.
    async fn lines_for_entry(
        &self,
        tx: &mut Self::Tx,
        entry_id: EntryId,
    ) -> Result<Vec<JournalLine>, StoreError>;

    /// Derives the account's bucket balances from all lines visible in this
    /// transaction.
    async fn sum_buckets(
        &self,
        tx: &mut Self::Tx,
        account_id: AccountId,
    ) -> Result<Balances, StoreError>;

    /// Sums committed AVAILABLE-bucket debits against the account since the
    /// given instant. Used for rolling spend ceilings.
    async fn sum_available_debits_since(
        &self,
        tx: &mut Self::Tx,
        account_id: AccountId,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Lists entries touching the account, newest first, starting strictly
    /// after `cursor` when given.
    async fn list_entries_for_account(
        &self,
        tx: &mut Self::Tx,
        account_id: AccountId,
        cursor: Option<EntryId>,
        limit: u32,
    ) -> Result<Vec<JournalEntry>, StoreError>;

    // ========== State machines ==========

    /// Inserts a hold.
    async fn insert_hold(&self, tx: &mut Self::Tx, hold: Hold) -> Result<(), StoreError>;

    /// Reads a hold by id.
    async fn find_hold(
        &self,
        tx: &mut Self::Tx,
        id: HoldId,
    ) -> Result<Option<Hold>, StoreError>;

    /// Persists a hold's mutated status and remaining amount.
    async fn update_hold(&self, tx: &mut Self::Tx, hold: &Hold) -> Result<(), StoreError>;

    /// Inserts a payment intent.
    async fn insert_intent(
        &self,
        tx: &mut Self::Tx,
        intent: PaymentIntent,
    ) -> Result<(), StoreError>;

    /// Reads a payment intent by id.
    async fn find_intent(
        &self,
        tx: &mut Self::Tx,
        id: IntentId,
    ) -> Result<Option<PaymentIntent>, StoreError>;

    /// Persists an intent's mutated status and settlement fields.
    async fn update_intent(
        &self,
        tx: &mut Self::Tx,
        intent: &PaymentIntent,
    ) -> Result<(), StoreError>;

    /// Inserts a refund record.
    async fn insert_refund(&self, tx: &mut Self::Tx, refund: Refund) -> Result<(), StoreError>;

    /// Sums posted refund amounts linked to a capture entry.
    async fn sum_refunds_for_capture(
        &self,
        tx: &mut Self::Tx,
        capture_entry_id: EntryId,
    ) -> Result<i64, StoreError>;

    // ========== Idempotency ==========

    /// Atomically reserves the (api-key, key) pair, classifying any existing
    /// record. `Fresh` means an IN_FLIGHT reservation now exists and is
    /// discarded if this transaction rolls back.
    async fn idempotency_reserve(
        &self,
        tx: &mut Self::Tx,
        api_key_id: ApiKeyId,
        key: &IdempotencyKey,
        fingerprint: &Fingerprint,
    ) -> Result<IdempotencyReservation, StoreError>;

    /// Completes the reservation with the final snapshot. Must be called in
    /// the same transaction that reserved the key.
    async fn idempotency_complete(
        &self,
        tx: &mut Self::Tx,
        api_key_id: ApiKeyId,
        key: &IdempotencyKey,
        snapshot: &Snapshot,
    ) -> Result<(), StoreError>;
}
