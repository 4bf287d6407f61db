//! The transaction executor: the one orchestrator every money-moving
//! operation runs through.
//!
//! Sequence per attempt:
//!
//! 1. reserve the idempotency key (replay/conflict short-circuits here)
//! 2. plan: read-only resolution of recipients and state, yielding the lock
//!    set and the outgoing spend to check
//! 3. acquire account locks in ascending account-id order
//! 4. enforce spend ceilings under the payer lock
//! 5. apply: validate balances under lock, post the entry, update state
//!    machines
//! 6. verify the non-negativity invariant on every locked user account
//! 7. complete the idempotency record and commit
//!
//! Serialization conflicts retry the whole attempt with exponential backoff,
//! bounded by configuration; the operation deadline cancels the in-flight
//! attempt and surfaces `TIMEOUT`. Final business failures commit the
//! idempotency record (plus any state an operation materialized on the way,
//! e.g. a lazy hold expiry) so retries replay the same outcome; everything
//! else rolls back without a trace.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use tesoro_shared::config::LedgerConfig;
use tesoro_shared::types::AccountId;
use tesoro_shared::{ApiKeyIdentity, Money, Scope};

use crate::authz;
use crate::idempotency::{Fingerprint, IdempotencyKey, Snapshot};
use crate::store::{IdempotencyReservation, LedgerStore, StoreError};

use super::error::LedgerError;
use super::types::Account;

/// Executor tuning, derived from [`LedgerConfig`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Retry budget for serialization conflicts.
    pub max_commit_retries: u32,
    /// Base backoff, doubled per retry.
    pub retry_backoff: Duration,
    /// Rolling window for spend ceilings.
    pub spend_window: chrono::Duration,
    /// Deadline for one operation including retries.
    pub operation_timeout: Duration,
}

impl From<&LedgerConfig> for ExecutorConfig {
    fn from(cfg: &LedgerConfig) -> Self {
        Self {
            max_commit_retries: cfg.max_commit_retries,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            spend_window: chrono::Duration::seconds(cfg.spend_window_secs as i64),
            operation_timeout: Duration::from_millis(cfg.operation_timeout_ms),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&LedgerConfig::default())
    }
}

/// The spend an operation charges against the caller's ceilings.
#[derive(Debug, Clone, Copy)]
pub struct SpendCheck {
    /// The account whose committed debits are summed.
    pub payer: AccountId,
    /// The outgoing amount of this operation.
    pub amount: Money,
}

/// What an operation needs from the executor before `apply` runs.
#[derive(Debug, Clone)]
pub struct OperationPlan {
    /// Accounts to lock. Order is irrelevant; the executor sorts ascending.
    pub locks: Vec<AccountId>,
    /// Outgoing spend to enforce ceilings against, if any.
    pub spend: Option<SpendCheck>,
}

/// The accounts the executor locked for this attempt, keyed by id.
#[derive(Debug)]
pub struct LockedAccounts {
    inner: BTreeMap<AccountId, Account>,
}

impl LockedAccounts {
    /// Looks up a locked account.
    #[must_use]
    pub fn get(&self, id: AccountId) -> Option<&Account> {
        self.inner.get(&id)
    }

    /// Looks up a locked account, failing loudly if the operation never
    /// planned a lock for it.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation`; hitting this is an operation bug.
    pub fn require(&self, id: AccountId) -> Result<&Account, LedgerError> {
        self.get(id).ok_or_else(|| {
            LedgerError::InvariantViolation(format!("account {id} was not in the lock plan"))
        })
    }

    /// Iterates the locked accounts in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &Account)> {
        self.inner.iter()
    }
}

/// A money-moving operation executable by the executor.
///
/// Contract for implementors: `plan` must be read-only. `apply` must finish
/// all validation before writing anything, with one sanctioned exception:
/// state the operation is allowed to materialize on the way to a *final*
/// error (lazy hold/intent expiry) may be staged before returning that
/// error, because final errors commit together with the failure record.
#[async_trait]
pub trait LedgerOperation<S: LedgerStore>: Send + Sync {
    /// The response recorded in the idempotency snapshot.
    type Receipt: Serialize + DeserializeOwned + Send;

    /// Name used in request fingerprints and logs.
    fn name(&self) -> &'static str;

    /// The scope the caller must hold.
    fn scope(&self) -> Scope;

    /// Read-only planning: resolve recipients, load state, produce the lock
    /// set and spend check.
    async fn plan(&self, store: &S, tx: &mut S::Tx) -> Result<OperationPlan, LedgerError>;

    /// Runs with all planned accounts locked: validate under lock, post
    /// lines, update state machines.
    async fn apply(
        &self,
        store: &S,
        tx: &mut S::Tx,
        accounts: &LockedAccounts,
        now: DateTime<Utc>,
    ) -> Result<Self::Receipt, LedgerError>;
}

enum AttemptError {
    /// Retry the whole attempt after backoff.
    Retryable(String),
    /// Surface to the caller as-is.
    Fatal(LedgerError),
}

fn classify(err: StoreError) -> AttemptError {
    if err.is_retryable() {
        AttemptError::Retryable(err.to_string())
    } else {
        AttemptError::Fatal(err.into())
    }
}

/// Runs operations transactionally against the store.
pub struct TransactionExecutor<S: LedgerStore> {
    store: Arc<S>,
    config: ExecutorConfig,
}

impl<S: LedgerStore> TransactionExecutor<S> {
    /// Creates an executor over the store.
    pub fn new(store: Arc<S>, config: ExecutorConfig) -> Self {
        Self { store, config }
    }

    /// The configured rolling spend window.
    #[must_use]
    pub fn spend_window(&self) -> chrono::Duration {
        self.config.spend_window
    }

    /// Executes one idempotent operation to completion.
    ///
    /// # Errors
    ///
    /// Any [`LedgerError`] the operation or the executor produces. Transient
    /// store conflicts are retried up to the configured budget before
    /// surfacing `TransientConflict`; deadline expiry surfaces `Timeout`.
    pub async fn execute<O>(
        &self,
        identity: &ApiKeyIdentity,
        key: &IdempotencyKey,
        fingerprint: &Fingerprint,
        op: &O,
    ) -> Result<O::Receipt, LedgerError>
    where
        O: LedgerOperation<S>,
    {
        authz::require_scope(identity, op.scope())?;

        let deadline = tokio::time::Instant::now() + self.config.operation_timeout;
        let mut attempt: u32 = 0;

        loop {
            let outcome =
                tokio::time::timeout_at(deadline, self.attempt(identity, key, fingerprint, op))
                    .await;

            match outcome {
                Err(_) => {
                    warn!(op = op.name(), key = %key, "operation deadline expired");
                    return Err(LedgerError::Timeout);
                }
                Ok(Ok(receipt)) => return Ok(receipt),
                Ok(Err(AttemptError::Fatal(err))) => return Err(err),
                Ok(Err(AttemptError::Retryable(reason))) => {
                    if attempt >= self.config.max_commit_retries {
                        warn!(
                            op = op.name(),
                            key = %key,
                            attempts = attempt + 1,
                            reason,
                            "serialization conflicts exhausted the retry budget"
                        );
                        return Err(LedgerError::TransientConflict);
                    }
                    let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempt);
                    debug!(
                        op = op.name(),
                        key = %key,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        reason,
                        "retrying after serialization conflict"
                    );
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn attempt<O>(
        &self,
        identity: &ApiKeyIdentity,
        key: &IdempotencyKey,
        fingerprint: &Fingerprint,
        op: &O,
    ) -> Result<O::Receipt, AttemptError>
    where
        O: LedgerOperation<S>,
    {
        let store = self.store.as_ref();
        let mut tx = store.begin().await.map_err(classify)?;

        match store
            .idempotency_reserve(&mut tx, identity.api_key_id, key, fingerprint)
            .await
            .map_err(classify)?
        {
            IdempotencyReservation::Fresh => {}
            IdempotencyReservation::Replay(snapshot) => {
                let _ = store.rollback(tx).await;
                debug!(op = op.name(), key = %key, "replaying idempotency snapshot");
                return snapshot.replay::<O::Receipt>().map_err(AttemptError::Fatal);
            }
            IdempotencyReservation::InFlight => {
                let _ = store.rollback(tx).await;
                return Err(AttemptError::Fatal(LedgerError::IdempotencyInProgress));
            }
            IdempotencyReservation::Mismatch => {
                let _ = store.rollback(tx).await;
                return Err(AttemptError::Fatal(LedgerError::IdempotencyConflict));
            }
        }

        let plan = match op.plan(store, &mut tx).await {
            Ok(plan) => plan,
            Err(err) => return self.finish_failure(tx, identity, key, err).await,
        };

        let mut lock_ids = plan.locks.clone();
        lock_ids.sort_unstable();
        lock_ids.dedup();

        let mut locked = BTreeMap::new();
        for id in lock_ids {
            let account = store.lock_account(&mut tx, id).await.map_err(classify)?;
            locked.insert(id, account);
        }
        let accounts = LockedAccounts { inner: locked };

        let now = Utc::now();

        if let Some(spend) = plan.spend {
            if let Err(err) = authz::enforce_spend_ceiling(
                store,
                &mut tx,
                identity,
                spend.payer,
                spend.amount,
                self.config.spend_window,
                now,
            )
            .await
            {
                return self.finish_failure(tx, identity, key, err).await;
            }
        }

        match op.apply(store, &mut tx, &accounts, now).await {
            Ok(receipt) => {
                for (id, account) in accounts.iter() {
                    if !account.enforces_non_negative() {
                        continue;
                    }
                    let balances = store.sum_buckets(&mut tx, *id).await.map_err(classify)?;
                    if let Err(err) = balances.check_non_negative() {
                        let _ = store.rollback(tx).await;
                        return Err(AttemptError::Fatal(err));
                    }
                }

                let snapshot = Snapshot::success(&receipt).map_err(AttemptError::Fatal)?;
                store
                    .idempotency_complete(&mut tx, identity.api_key_id, key, &snapshot)
                    .await
                    .map_err(classify)?;
                store.commit(tx).await.map_err(classify)?;
                Ok(receipt)
            }
            Err(err) => self.finish_failure(tx, identity, key, err).await,
        }
    }

    /// Finishes an attempt that failed with `err`. Final errors are recorded
    /// and committed so retries replay them; everything else rolls back.
    async fn finish_failure<T>(
        &self,
        mut tx: S::Tx,
        identity: &ApiKeyIdentity,
        key: &IdempotencyKey,
        err: LedgerError,
    ) -> Result<T, AttemptError> {
        let store = self.store.as_ref();

        if !err.is_recorded() {
            let _ = store.rollback(tx).await;
            return Err(AttemptError::Fatal(err));
        }

        let snapshot = Snapshot::failure(&err).map_err(AttemptError::Fatal)?;
        store
            .idempotency_complete(&mut tx, identity.api_key_id, key, &snapshot)
            .await
            .map_err(classify)?;
        store.commit(tx).await.map_err(classify)?;
        Err(AttemptError::Fatal(err))
    }
}
