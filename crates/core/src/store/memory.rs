//! In-memory implementation of the store port.
//!
//! Backs the engine's test suites. Row locks are per-account `tokio`
//! mutexes held for the life of the transaction; writes are staged in the
//! transaction handle and applied atomically on commit, so other
//! transactions never observe uncommitted state. Idempotency reservations
//! are the one exception: they become visible at reserve time (so concurrent
//! duplicates are detected) and are discarded on rollback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use tesoro_shared::types::{AccountId, ApiKeyId, EntryId, HoldId, IntentId, LineId, WalletId};

use crate::idempotency::{Fingerprint, IdempotencyKey, RecordStatus, Snapshot};
use crate::ledger::balance::{BalanceAccumulator, Balances};
use crate::ledger::posting::{self, EntryDraft};
use crate::ledger::types::{
    Account, AccountStatus, Bucket, Hold, JournalEntry, JournalLine, PaymentIntent, Refund, Side,
    Wallet,
};

use super::{IdempotencyReservation, LedgerStore, NewWallet, StoreError};

#[derive(Debug, Clone)]
struct IdemRecord {
    fingerprint: String,
    status: RecordStatus,
    snapshot: Option<Snapshot>,
}

#[derive(Default)]
struct State {
    wallets: HashMap<WalletId, Wallet>,
    handles: HashMap<String, WalletId>,
    external: HashMap<(String, String), WalletId>,
    accounts: HashMap<AccountId, Account>,
    accounts_by_wallet: HashMap<WalletId, AccountId>,
    entries: Vec<JournalEntry>,
    entries_by_id: HashMap<EntryId, usize>,
    lines: Vec<JournalLine>,
    lines_by_account: HashMap<AccountId, Vec<usize>>,
    lines_by_entry: HashMap<EntryId, Vec<usize>>,
    holds: HashMap<HoldId, Hold>,
    intents: HashMap<IntentId, PaymentIntent>,
    refunds: Vec<Refund>,
    refunds_by_capture: HashMap<EntryId, Vec<usize>>,
    idempotency: HashMap<(ApiKeyId, String), IdemRecord>,
}

#[derive(Default)]
struct Staged {
    wallets: Vec<NewWallet>,
    external_identities: Vec<(String, String, WalletId)>,
    account_status: Vec<(AccountId, AccountStatus)>,
    entries: Vec<(JournalEntry, Vec<JournalLine>)>,
    holds_inserted: Vec<Hold>,
    holds_updated: Vec<Hold>,
    intents_inserted: Vec<PaymentIntent>,
    intents_updated: Vec<PaymentIntent>,
    refunds: Vec<Refund>,
    idem_reserved: Option<(ApiKeyId, String)>,
    idem_snapshot: Option<Snapshot>,
}

/// Transaction handle: staged writes plus the account locks held.
///
/// Dropping the handle without committing rolls the transaction back,
/// including discarding its idempotency reservation. That keeps aborted
/// operations (deadline expiry cancels the future mid-flight) from leaving
/// IN_FLIGHT stragglers behind.
pub struct MemoryTx {
    guards: HashMap<AccountId, OwnedMutexGuard<()>>,
    staged: Staged,
    state: Arc<Mutex<State>>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(map_key) = self.staged.idem_reserved.take() {
            let mut state = self.state.lock().expect("state poisoned");
            if let Some(record) = state.idempotency.get(&map_key) {
                if record.status == RecordStatus::InFlight {
                    state.idempotency.remove(&map_key);
                }
            }
        }
    }
}

/// In-memory ledger store.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<State>>,
    account_locks: Arc<Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>>,
    commit_failures: Arc<AtomicU32>,
}

impl InMemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` commits fail with a serialization conflict.
    /// Test knob for exercising the executor's retry path.
    pub fn fail_next_commits(&self, n: u32) {
        self.commit_failures.store(n, Ordering::SeqCst);
    }

    fn lock_handle_for(&self, id: AccountId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.account_locks.lock().expect("account lock table poisoned");
        locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn account_with_overlay(&self, tx: &MemoryTx, id: AccountId) -> Option<Account> {
        let state = self.state.lock().expect("state poisoned");
        let mut account = state.accounts.get(&id).cloned().or_else(|| {
            tx.staged
                .wallets
                .iter()
                .map(|w| &w.account)
                .find(|a| a.id == id)
                .cloned()
        })?;
        for (acc_id, status) in &tx.staged.account_status {
            if *acc_id == id {
                account.status = *status;
            }
        }
        Some(account)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(MemoryTx {
            guards: HashMap::new(),
            staged: Staged::default(),
            state: Arc::clone(&self.state),
        })
    }

    async fn commit(&self, mut tx: Self::Tx) -> Result<(), StoreError> {
        if self.commit_failures.load(Ordering::SeqCst) > 0 {
            self.commit_failures.fetch_sub(1, Ordering::SeqCst);
            // A failed commit applies nothing; dropping the handle discards
            // the reservation.
            return Err(StoreError::Serialization(
                "injected serialization conflict".to_string(),
            ));
        }

        let staged = std::mem::take(&mut tx.staged);
        let mut state = self.state.lock().expect("state poisoned");

        for new in staged.wallets {
            if let Some(handle) = &new.wallet.handle {
                state.handles.insert(handle.clone(), new.wallet.id);
            }
            state
                .accounts_by_wallet
                .insert(new.wallet.id, new.account.id);
            state.accounts.insert(new.account.id, new.account);
            state.wallets.insert(new.wallet.id, new.wallet);
        }

        for (provider, external_ref, wallet_id) in staged.external_identities {
            state.external.insert((provider, external_ref), wallet_id);
        }

        for (account_id, status) in staged.account_status {
            if let Some(account) = state.accounts.get_mut(&account_id) {
                account.status = status;
            }
        }

        for (entry, lines) in staged.entries {
            let entry_ix = state.entries.len();
            state.entries_by_id.insert(entry.id, entry_ix);
            for line in lines {
                let line_ix = state.lines.len();
                state
                    .lines_by_account
                    .entry(line.account_id)
                    .or_default()
                    .push(line_ix);
                state
                    .lines_by_entry
                    .entry(line.entry_id)
                    .or_default()
                    .push(line_ix);
                state.lines.push(line);
            }
            state.entries.push(entry);
        }

        for hold in staged.holds_inserted {
            state.holds.insert(hold.id, hold);
        }
        for hold in staged.holds_updated {
            state.holds.insert(hold.id, hold);
        }
        for intent in staged.intents_inserted {
            state.intents.insert(intent.id, intent);
        }
        for intent in staged.intents_updated {
            state.intents.insert(intent.id, intent);
        }

        for refund in staged.refunds {
            let ix = state.refunds.len();
            state
                .refunds_by_capture
                .entry(refund.capture_entry_id)
                .or_default()
                .push(ix);
            state.refunds.push(refund);
        }

        if let Some((api_key_id, key)) = staged.idem_reserved.clone() {
            if let Some(snapshot) = staged.idem_snapshot {
                let status = if snapshot.ok {
                    RecordStatus::Completed
                } else {
                    RecordStatus::Failed
                };
                if let Some(record) = state.idempotency.get_mut(&(api_key_id, key)) {
                    record.status = status;
                    record.snapshot = Some(snapshot);
                }
            }
        }

        drop(state);
        drop(tx);
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError> {
        // Dropping the handle releases locks and discards the reservation.
        drop(tx);
        Ok(())
    }

    async fn lock_account(
        &self,
        tx: &mut Self::Tx,
        id: AccountId,
    ) -> Result<Account, StoreError> {
        if !tx.guards.contains_key(&id) {
            let mutex = self.lock_handle_for(id);
            let guard = mutex.lock_owned().await;
            tx.guards.insert(id, guard);
        }
        self.account_with_overlay(tx, id)
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))
    }

    async fn find_account(
        &self,
        tx: &mut Self::Tx,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self.account_with_overlay(tx, id))
    }

    async fn find_account_for_wallet(
        &self,
        tx: &mut Self::Tx,
        wallet_id: WalletId,
    ) -> Result<Option<Account>, StoreError> {
        let account_id = {
            let state = self.state.lock().expect("state poisoned");
            state.accounts_by_wallet.get(&wallet_id).copied()
        }
        .or_else(|| {
            tx.staged
                .wallets
                .iter()
                .find(|w| w.wallet.id == wallet_id)
                .map(|w| w.account.id)
        });
        Ok(account_id.and_then(|id| self.account_with_overlay(tx, id)))
    }

    async fn find_wallet(
        &self,
        tx: &mut Self::Tx,
        id: WalletId,
    ) -> Result<Option<Wallet>, StoreError> {
        let state = self.state.lock().expect("state poisoned");
        Ok(state.wallets.get(&id).cloned().or_else(|| {
            tx.staged
                .wallets
                .iter()
                .map(|w| &w.wallet)
                .find(|w| w.id == id)
                .cloned()
        }))
    }

    async fn find_wallet_by_handle(
        &self,
        tx: &mut Self::Tx,
        handle: &str,
    ) -> Result<Option<Wallet>, StoreError> {
        let state = self.state.lock().expect("state poisoned");
        let committed = state
            .handles
            .get(handle)
            .and_then(|id| state.wallets.get(id))
            .cloned();
        Ok(committed.or_else(|| {
            tx.staged
                .wallets
                .iter()
                .map(|w| &w.wallet)
                .find(|w| w.handle.as_deref() == Some(handle))
                .cloned()
        }))
    }

    async fn find_wallet_by_external_ref(
        &self,
        tx: &mut Self::Tx,
        provider: &str,
        external_ref: &str,
    ) -> Result<Option<Wallet>, StoreError> {
        let from_committed = {
            let state = self.state.lock().expect("state poisoned");
            state
                .external
                .get(&(provider.to_string(), external_ref.to_string()))
                .and_then(|id| state.wallets.get(id))
                .cloned()
        };
        if from_committed.is_some() {
            return Ok(from_committed);
        }
        let staged_wallet_id = tx
            .staged
            .external_identities
            .iter()
            .find(|(p, r, _)| p == provider && r == external_ref)
            .map(|(_, _, id)| *id);
        match staged_wallet_id {
            Some(id) => self.find_wallet(tx, id).await,
            None => Ok(None),
        }
    }

    async fn insert_wallet(&self, tx: &mut Self::Tx, new: NewWallet) -> Result<(), StoreError> {
        if let Some(handle) = &new.wallet.handle {
            let taken = {
                let state = self.state.lock().expect("state poisoned");
                state.handles.contains_key(handle)
            } || tx
                .staged
                .wallets
                .iter()
                .any(|w| w.wallet.handle.as_deref() == Some(handle.as_str()));
            if taken {
                return Err(StoreError::Constraint(format!(
                    "handle {handle} already in use"
                )));
            }
        }
        tx.staged.wallets.push(new);
        Ok(())
    }

    async fn insert_external_identity(
        &self,
        tx: &mut Self::Tx,
        provider: &str,
        external_ref: &str,
        wallet_id: WalletId,
    ) -> Result<(), StoreError> {
        tx.staged.external_identities.push((
            provider.to_string(),
            external_ref.to_string(),
            wallet_id,
        ));
        Ok(())
    }

    async fn set_account_status(
        &self,
        tx: &mut Self::Tx,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<(), StoreError> {
        if self.account_with_overlay(tx, id).is_none() {
            return Err(StoreError::NotFound(format!("account {id}")));
        }
        tx.staged.account_status.push((id, status));
        Ok(())
    }

    async fn insert_entry(
        &self,
        tx: &mut Self::Tx,
        draft: EntryDraft,
    ) -> Result<JournalEntry, StoreError> {
        posting::validate_lines(&draft.lines)
            .map_err(|e| StoreError::Constraint(format!("unbalanced entry rejected: {e}")))?;

        let entry = JournalEntry {
            id: draft.id,
            kind: draft.kind,
            initiator_wallet_id: draft.initiator_wallet_id,
            reference_id: draft.reference_id,
            metadata: draft.metadata,
            idempotency_key: draft.idempotency_key,
            linked_entry_id: draft.linked_entry_id,
            created_at: Utc::now(),
        };
        let lines = draft
            .lines
            .into_iter()
            .map(|spec| JournalLine {
                id: LineId::new(),
                entry_id: entry.id,
                account_id: spec.account_id,
                side: spec.side,
                bucket: spec.bucket,
                amount: spec.amount,
            })
            .collect();
        tx.staged.entries.push((entry.clone(), lines));
        Ok(entry)
    }

    async fn find_entry(
        &self,
        tx: &mut Self::Tx,
        id: EntryId,
    ) -> Result<Option<JournalEntry>, StoreError> {
        let state = self.state.lock().expect("state poisoned");
        let committed = state
            .entries_by_id
            .get(&id)
            .and_then(|ix| state.entries.get(*ix))
            .cloned();
        Ok(committed.or_else(|| {
            tx.staged
                .entries
                .iter()
                .map(|(e, _)| e)
                .find(|e| e.id == id)
                .cloned()
        }))
    }

    async fn lines_for_entry(
        &self,
        tx: &mut Self::Tx,
        entry_id: EntryId,
    ) -> Result<Vec<JournalLine>, StoreError> {
        let state = self.state.lock().expect("state poisoned");
        let mut lines: Vec<JournalLine> = state
            .lines_by_entry
            .get(&entry_id)
            .map(|ixs| ixs.iter().map(|ix| state.lines[*ix].clone()).collect())
            .unwrap_or_default();
        drop(state);
        for (entry, staged_lines) in &tx.staged.entries {
            if entry.id == entry_id {
                lines.extend(staged_lines.iter().cloned());
            }
        }
        Ok(lines)
    }

    async fn sum_buckets(
        &self,
        tx: &mut Self::Tx,
        account_id: AccountId,
    ) -> Result<Balances, StoreError> {
        let account = self
            .account_with_overlay(tx, account_id)
            .ok_or_else(|| StoreError::NotFound(format!("account {account_id}")))?;

        let mut acc = BalanceAccumulator::default();
        {
            let state = self.state.lock().expect("state poisoned");
            if let Some(ixs) = state.lines_by_account.get(&account_id) {
                for ix in ixs {
                    let line = &state.lines[*ix];
                    acc.add_line(line.bucket, line.side, line.amount.minor_units)
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                }
            }
        }
        for (_, staged_lines) in &tx.staged.entries {
            for line in staged_lines {
                if line.account_id == account_id {
                    acc.add_line(line.bucket, line.side, line.amount.minor_units)
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                }
            }
        }

        acc.finish(account.currency)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn sum_available_debits_since(
        &self,
        tx: &mut Self::Tx,
        account_id: AccountId,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let _ = tx;
        let state = self.state.lock().expect("state poisoned");
        let mut total: i64 = 0;
        if let Some(ixs) = state.lines_by_account.get(&account_id) {
            for ix in ixs {
                let line = &state.lines[*ix];
                if line.side != Side::Debit || line.bucket != Bucket::Available {
                    continue;
                }
                let entry_ix = state.entries_by_id[&line.entry_id];
                if state.entries[entry_ix].created_at < since {
                    continue;
                }
                total = total
                    .checked_add(line.amount.minor_units)
                    .ok_or_else(|| StoreError::Backend("spend sum overflowed".to_string()))?;
            }
        }
        Ok(total)
    }

    async fn list_entries_for_account(
        &self,
        tx: &mut Self::Tx,
        account_id: AccountId,
        cursor: Option<EntryId>,
        limit: u32,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let _ = tx;
        let state = self.state.lock().expect("state poisoned");
        let mut entries: Vec<JournalEntry> = state
            .lines_by_account
            .get(&account_id)
            .map(|ixs| {
                ixs.iter()
                    .map(|ix| state.entries[state.entries_by_id[&state.lines[*ix].entry_id]].clone())
                    .collect()
            })
            .unwrap_or_default();
        // Entry ids are UUID v7: id order is creation order, and the cursor
        // is an id, so ordering and pagination agree.
        entries.sort_unstable_by_key(|e| e.id);
        entries.dedup_by_key(|e| e.id);

        let mut result = Vec::new();
        for entry in entries.into_iter().rev() {
            if let Some(cursor) = cursor {
                if entry.id >= cursor {
                    continue;
                }
            }
            result.push(entry);
            if result.len() as u32 >= limit {
                break;
            }
        }
        Ok(result)
    }

    async fn insert_hold(&self, tx: &mut Self::Tx, hold: Hold) -> Result<(), StoreError> {
        tx.staged.holds_inserted.push(hold);
        Ok(())
    }

    async fn find_hold(
        &self,
        tx: &mut Self::Tx,
        id: HoldId,
    ) -> Result<Option<Hold>, StoreError> {
        // Staged updates shadow staged inserts which shadow committed state.
        if let Some(hold) = tx.staged.holds_updated.iter().rev().find(|h| h.id == id) {
            return Ok(Some(hold.clone()));
        }
        if let Some(hold) = tx.staged.holds_inserted.iter().find(|h| h.id == id) {
            return Ok(Some(hold.clone()));
        }
        let state = self.state.lock().expect("state poisoned");
        Ok(state.holds.get(&id).cloned())
    }

    async fn update_hold(&self, tx: &mut Self::Tx, hold: &Hold) -> Result<(), StoreError> {
        tx.staged.holds_updated.push(hold.clone());
        Ok(())
    }

    async fn insert_intent(
        &self,
        tx: &mut Self::Tx,
        intent: PaymentIntent,
    ) -> Result<(), StoreError> {
        tx.staged.intents_inserted.push(intent);
        Ok(())
    }

    async fn find_intent(
        &self,
        tx: &mut Self::Tx,
        id: IntentId,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        if let Some(intent) = tx.staged.intents_updated.iter().rev().find(|i| i.id == id) {
            return Ok(Some(intent.clone()));
        }
        if let Some(intent) = tx.staged.intents_inserted.iter().find(|i| i.id == id) {
            return Ok(Some(intent.clone()));
        }
        let state = self.state.lock().expect("state poisoned");
        Ok(state.intents.get(&id).cloned())
    }

    async fn update_intent(
        &self,
        tx: &mut Self::Tx,
        intent: &PaymentIntent,
    ) -> Result<(), StoreError> {
        tx.staged.intents_updated.push(intent.clone());
        Ok(())
    }

    async fn insert_refund(&self, tx: &mut Self::Tx, refund: Refund) -> Result<(), StoreError> {
        tx.staged.refunds.push(refund);
        Ok(())
    }

    async fn sum_refunds_for_capture(
        &self,
        tx: &mut Self::Tx,
        capture_entry_id: EntryId,
    ) -> Result<i64, StoreError> {
        let mut total: i64 = 0;
        {
            let state = self.state.lock().expect("state poisoned");
            if let Some(ixs) = state.refunds_by_capture.get(&capture_entry_id) {
                for ix in ixs {
                    total = total
                        .checked_add(state.refunds[*ix].amount.minor_units)
                        .ok_or_else(|| {
                            StoreError::Backend("refund sum overflowed".to_string())
                        })?;
                }
            }
        }
        for refund in &tx.staged.refunds {
            if refund.capture_entry_id == capture_entry_id {
                total = total
                    .checked_add(refund.amount.minor_units)
                    .ok_or_else(|| StoreError::Backend("refund sum overflowed".to_string()))?;
            }
        }
        Ok(total)
    }

    async fn idempotency_reserve(
        &self,
        tx: &mut Self::Tx,
        api_key_id: ApiKeyId,
        key: &IdempotencyKey,
        fingerprint: &Fingerprint,
    ) -> Result<IdempotencyReservation, StoreError> {
        let mut state = self.state.lock().expect("state poisoned");
        let map_key = (api_key_id, key.as_str().to_string());

        match state.idempotency.get(&map_key) {
            None => {
                state.idempotency.insert(
                    map_key.clone(),
                    IdemRecord {
                        fingerprint: fingerprint.as_str().to_string(),
                        status: RecordStatus::InFlight,
                        snapshot: None,
                    },
                );
                tx.staged.idem_reserved = Some(map_key);
                Ok(IdempotencyReservation::Fresh)
            }
            Some(record) if record.fingerprint != fingerprint.as_str() => {
                Ok(IdempotencyReservation::Mismatch)
            }
            Some(record) => match record.status {
                RecordStatus::InFlight => Ok(IdempotencyReservation::InFlight),
                RecordStatus::Completed | RecordStatus::Failed => {
                    let snapshot = record.snapshot.clone().ok_or_else(|| {
                        StoreError::Backend("completed record without snapshot".to_string())
                    })?;
                    Ok(IdempotencyReservation::Replay(snapshot))
                }
            },
        }
    }

    async fn idempotency_complete(
        &self,
        tx: &mut Self::Tx,
        api_key_id: ApiKeyId,
        key: &IdempotencyKey,
        snapshot: &Snapshot,
    ) -> Result<(), StoreError> {
        let expected = (api_key_id, key.as_str().to_string());
        if tx.staged.idem_reserved.as_ref() != Some(&expected) {
            return Err(StoreError::Backend(
                "idempotency_complete without a reservation in this transaction".to_string(),
            ));
        }
        tx.staged.idem_snapshot = Some(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::posting::transfer_lines;
    use crate::ledger::types::AccountType;
    use tesoro_shared::{Currency, Money};

    fn wallet(handle: &str) -> NewWallet {
        let wallet_id = WalletId::new();
        NewWallet {
            wallet: Wallet {
                id: wallet_id,
                handle: Some(handle.to_string()),
                display_name: handle.trim_start_matches('@').to_string(),
                created_at: Utc::now(),
            },
            account: Account {
                id: AccountId::new(),
                wallet_id,
                currency: Currency::Usd,
                account_type: AccountType::User,
                status: AccountStatus::Active,
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_staged_writes_invisible_until_commit() {
        let store = InMemoryLedgerStore::new();
        let new = wallet("@alice");
        let account_id = new.account.id;

        let mut tx = store.begin().await.unwrap();
        store.insert_wallet(&mut tx, new).await.unwrap();

        // A second transaction must not see the staged wallet.
        let mut other = store.begin().await.unwrap();
        assert!(store
            .find_wallet_by_handle(&mut other, "@alice")
            .await
            .unwrap()
            .is_none());
        store.rollback(other).await.unwrap();

        store.commit(tx).await.unwrap();

        let mut after = store.begin().await.unwrap();
        assert!(store
            .find_account(&mut after, account_id)
            .await
            .unwrap()
            .is_some());
        store.rollback(after).await.unwrap();
    }

    #[tokio::test]
    async fn test_sum_buckets_sees_own_staged_lines() {
        let store = InMemoryLedgerStore::new();
        let payer = wallet("@payer");
        let payee = wallet("@payee");
        let (payer_acc, payee_acc) = (payer.account.id, payee.account.id);

        let mut setup = store.begin().await.unwrap();
        store.insert_wallet(&mut setup, payer).await.unwrap();
        store.insert_wallet(&mut setup, payee).await.unwrap();
        store.commit(setup).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let draft = EntryDraft::new(
            crate::ledger::types::EntryKind::Transfer,
            WalletId::new(),
            transfer_lines(payer_acc, payee_acc, Money::from_minor(500, Currency::Usd)),
        )
        .unwrap();
        store.insert_entry(&mut tx, draft).await.unwrap();

        let balances = store.sum_buckets(&mut tx, payee_acc).await.unwrap();
        assert_eq!(balances.available, 500);

        // Not visible outside the transaction.
        let mut other = store.begin().await.unwrap();
        let outside = store.sum_buckets(&mut other, payee_acc).await.unwrap();
        assert_eq!(outside.available, 0);
        store.rollback(other).await.unwrap();

        store.rollback(tx).await.unwrap();
        let mut after = store.begin().await.unwrap();
        let rolled_back = store.sum_buckets(&mut after, payee_acc).await.unwrap();
        assert_eq!(rolled_back.available, 0);
        store.rollback(after).await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_discards_reservation() {
        let store = InMemoryLedgerStore::new();
        let api_key = ApiKeyId::new();
        let key = IdempotencyKey::parse("k1").unwrap();
        let fp = Fingerprint::of("op", &serde_json::json!({"a": 1})).unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            store
                .idempotency_reserve(&mut tx, api_key, &key, &fp)
                .await
                .unwrap(),
            IdempotencyReservation::Fresh
        );
        store.rollback(tx).await.unwrap();

        let mut retry = store.begin().await.unwrap();
        assert_eq!(
            store
                .idempotency_reserve(&mut retry, api_key, &key, &fp)
                .await
                .unwrap(),
            IdempotencyReservation::Fresh
        );
        store.rollback(retry).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_is_in_flight() {
        let store = InMemoryLedgerStore::new();
        let api_key = ApiKeyId::new();
        let key = IdempotencyKey::parse("k1").unwrap();
        let fp = Fingerprint::of("op", &serde_json::json!({"a": 1})).unwrap();

        let mut first = store.begin().await.unwrap();
        store
            .idempotency_reserve(&mut first, api_key, &key, &fp)
            .await
            .unwrap();

        let mut dup = store.begin().await.unwrap();
        assert_eq!(
            store
                .idempotency_reserve(&mut dup, api_key, &key, &fp)
                .await
                .unwrap(),
            IdempotencyReservation::InFlight
        );
        store.rollback(dup).await.unwrap();
        store.rollback(first).await.unwrap();
    }

    #[tokio::test]
    async fn test_unbalanced_entry_rejected() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut lines = transfer_lines(
            AccountId::new(),
            AccountId::new(),
            Money::from_minor(100, Currency::Usd),
        );
        lines[1].amount = Money::from_minor(99, Currency::Usd);
        let draft = EntryDraft {
            id: EntryId::new(),
            kind: crate::ledger::types::EntryKind::Transfer,
            initiator_wallet_id: WalletId::new(),
            reference_id: None,
            metadata: serde_json::Map::new(),
            idempotency_key: None,
            linked_entry_id: None,
            lines,
        };
        assert!(matches!(
            store.insert_entry(&mut tx, draft).await,
            Err(StoreError::Constraint(_))
        ));
        store.rollback(tx).await.unwrap();
    }
}
