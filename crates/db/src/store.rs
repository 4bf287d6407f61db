//! PostgreSQL implementation of the ledger store port.
//!
//! Account row locks use `SELECT ... FOR UPDATE`; balance sums are computed
//! inside the caller's transaction and therefore inside those locks.
//! Serialization failures and deadlocks surface as
//! `StoreError::Serialization`, which the executor retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use tesoro_core::idempotency::{Fingerprint, IdempotencyKey, Snapshot};
use tesoro_core::ledger::balance::{BalanceAccumulator, Balances};
use tesoro_core::ledger::posting::{self, EntryDraft};
use tesoro_core::ledger::types::{
    Account, AccountStatus, AccountType, Bucket, EntryKind, Hold, HoldStatus, IntentStatus,
    JournalEntry, JournalLine, PaymentIntent, Refund, RefundStatus, Side, Wallet,
};
use tesoro_core::store::{IdempotencyReservation, LedgerStore, NewWallet, StoreError};
use tesoro_shared::types::{AccountId, ApiKeyId, EntryId, HoldId, IntentId, LineId, WalletId};
use tesoro_shared::{Currency, Money};

use crate::entities::sea_orm_active_enums as db_enums;
use crate::entities::{
    accounts, external_identities, holds, idempotency_records, journal_entries, journal_lines,
    payment_intents, refunds, wallets,
};

/// The production ledger store over a `SeaORM` PostgreSQL pool.
#[derive(Clone)]
pub struct SeaOrmLedgerStore {
    db: DatabaseConnection,
}

impl SeaOrmLedgerStore {
    /// Wraps a connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn map_db_err(err: DbErr) -> StoreError {
    let msg = err.to_string();
    if msg.contains("could not serialize access")
        || msg.contains("deadlock detected")
        || msg.contains("40001")
    {
        StoreError::Serialization(msg)
    } else if msg.contains("duplicate key") || msg.contains("violates") {
        StoreError::Constraint(msg)
    } else {
        StoreError::Backend(msg)
    }
}

fn parse_currency(code: &str) -> Result<Currency, StoreError> {
    code.parse()
        .map_err(|e: String| StoreError::Backend(format!("corrupt currency column: {e}")))
}

fn decimal_sum_to_i64(total: Option<Decimal>) -> Result<i64, StoreError> {
    match total {
        None => Ok(0),
        Some(value) => value
            .to_i64()
            .ok_or_else(|| StoreError::Backend("sum exceeded i64 range".to_string())),
    }
}

// ============================================================================
// Enum and record conversions
// ============================================================================

impl From<EntryKind> for db_enums::EntryKind {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::Deposit => Self::Deposit,
            EntryKind::Transfer => Self::Transfer,
            EntryKind::Hold => Self::Hold,
            EntryKind::Capture => Self::Capture,
            EntryKind::Release => Self::Release,
            EntryKind::Refund => Self::Refund,
            EntryKind::IntentPay => Self::IntentPay,
        }
    }
}

impl From<db_enums::EntryKind> for EntryKind {
    fn from(kind: db_enums::EntryKind) -> Self {
        match kind {
            db_enums::EntryKind::Deposit => Self::Deposit,
            db_enums::EntryKind::Transfer => Self::Transfer,
            db_enums::EntryKind::Hold => Self::Hold,
            db_enums::EntryKind::Capture => Self::Capture,
            db_enums::EntryKind::Release => Self::Release,
            db_enums::EntryKind::Refund => Self::Refund,
            db_enums::EntryKind::IntentPay => Self::IntentPay,
        }
    }
}

impl From<Side> for db_enums::LineSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Debit => Self::Debit,
            Side::Credit => Self::Credit,
        }
    }
}

impl From<db_enums::LineSide> for Side {
    fn from(side: db_enums::LineSide) -> Self {
        match side {
            db_enums::LineSide::Debit => Self::Debit,
            db_enums::LineSide::Credit => Self::Credit,
        }
    }
}

impl From<Bucket> for db_enums::LineBucket {
    fn from(bucket: Bucket) -> Self {
        match bucket {
            Bucket::Available => Self::Available,
            Bucket::Held => Self::Held,
        }
    }
}

impl From<db_enums::LineBucket> for Bucket {
    fn from(bucket: db_enums::LineBucket) -> Self {
        match bucket {
            db_enums::LineBucket::Available => Self::Available,
            db_enums::LineBucket::Held => Self::Held,
        }
    }
}

impl From<HoldStatus> for db_enums::HoldStatus {
    fn from(status: HoldStatus) -> Self {
        match status {
            HoldStatus::Active => Self::Active,
            HoldStatus::PartiallyCaptured => Self::PartiallyCaptured,
            HoldStatus::Captured => Self::Captured,
            HoldStatus::Released => Self::Released,
            HoldStatus::Expired => Self::Expired,
        }
    }
}

impl From<db_enums::HoldStatus> for HoldStatus {
    fn from(status: db_enums::HoldStatus) -> Self {
        match status {
            db_enums::HoldStatus::Active => Self::Active,
            db_enums::HoldStatus::PartiallyCaptured => Self::PartiallyCaptured,
            db_enums::HoldStatus::Captured => Self::Captured,
            db_enums::HoldStatus::Released => Self::Released,
            db_enums::HoldStatus::Expired => Self::Expired,
        }
    }
}

impl From<IntentStatus> for db_enums::IntentStatus {
    fn from(status: IntentStatus) -> Self {
        match status {
            IntentStatus::Pending => Self::Pending,
            IntentStatus::Paid => Self::Paid,
            IntentStatus::Expired => Self::Expired,
            IntentStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl From<db_enums::IntentStatus> for IntentStatus {
    fn from(status: db_enums::IntentStatus) -> Self {
        match status {
            db_enums::IntentStatus::Pending => Self::Pending,
            db_enums::IntentStatus::Paid => Self::Paid,
            db_enums::IntentStatus::Expired => Self::Expired,
            db_enums::IntentStatus::Cancelled => Self::Cancelled,
        }
    }
}

fn account_from_model(model: accounts::Model) -> Result<Account, StoreError> {
    Ok(Account {
        id: AccountId::from_uuid(model.id),
        wallet_id: WalletId::from_uuid(model.wallet_id),
        currency: parse_currency(&model.currency)?,
        account_type: match model.account_type {
            db_enums::AccountType::User => AccountType::User,
            db_enums::AccountType::System => AccountType::System,
        },
        status: match model.status {
            db_enums::AccountStatus::Active => AccountStatus::Active,
            db_enums::AccountStatus::Frozen => AccountStatus::Frozen,
        },
        created_at: model.created_at.with_timezone(&Utc),
    })
}

fn wallet_from_model(model: wallets::Model) -> Wallet {
    Wallet {
        id: WalletId::from_uuid(model.id),
        handle: model.handle,
        display_name: model.display_name,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn entry_from_model(model: journal_entries::Model) -> JournalEntry {
    let metadata = match model.metadata {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    JournalEntry {
        id: EntryId::from_uuid(model.id),
        kind: model.kind.into(),
        initiator_wallet_id: WalletId::from_uuid(model.initiator_wallet_id),
        reference_id: model.reference_id,
        metadata,
        idempotency_key: model.idempotency_key,
        linked_entry_id: model.linked_entry_id.map(EntryId::from_uuid),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn line_from_model(model: journal_lines::Model) -> Result<JournalLine, StoreError> {
    Ok(JournalLine {
        id: LineId::from_uuid(model.id),
        entry_id: EntryId::from_uuid(model.entry_id),
        account_id: AccountId::from_uuid(model.account_id),
        side: model.side.into(),
        bucket: model.bucket.into(),
        amount: Money::from_minor(model.amount_minor, parse_currency(&model.currency)?),
    })
}

fn hold_from_model(model: holds::Model) -> Result<Hold, StoreError> {
    let currency = parse_currency(&model.currency)?;
    Ok(Hold {
        id: HoldId::from_uuid(model.id),
        account_id: AccountId::from_uuid(model.account_id),
        amount: Money::from_minor(model.amount_minor, currency),
        remaining: Money::from_minor(model.remaining_minor, currency),
        status: model.status.into(),
        expires_at: model.expires_at.with_timezone(&Utc),
        entry_id: EntryId::from_uuid(model.entry_id),
        created_at: model.created_at.with_timezone(&Utc),
    })
}

fn intent_from_model(model: payment_intents::Model) -> Result<PaymentIntent, StoreError> {
    let currency = parse_currency(&model.currency)?;
    let metadata = match model.metadata {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    Ok(PaymentIntent {
        id: IntentId::from_uuid(model.id),
        payee_account_id: AccountId::from_uuid(model.payee_account_id),
        amount: Money::from_minor(model.amount_minor, currency),
        status: model.status.into(),
        expires_at: model.expires_at.with_timezone(&Utc),
        metadata,
        payer_account_id: model.payer_account_id.map(AccountId::from_uuid),
        paid_entry_id: model.paid_entry_id.map(EntryId::from_uuid),
        created_at: model.created_at.with_timezone(&Utc),
    })
}

// ============================================================================
// Store implementation
// ============================================================================

#[async_trait]
impl LedgerStore for SeaOrmLedgerStore {
    type Tx = DatabaseTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        self.db.begin().await.map_err(map_db_err)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.commit().await.map_err(map_db_err)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.rollback().await.map_err(map_db_err)
    }

    async fn lock_account(
        &self,
        tx: &mut Self::Tx,
        id: AccountId,
    ) -> Result<Account, StoreError> {
        let model = accounts::Entity::find_by_id(id.into_inner())
            .lock_exclusive()
            .one(&*tx)
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
        account_from_model(model)
    }

    async fn find_account(
        &self,
        tx: &mut Self::Tx,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        accounts::Entity::find_by_id(id.into_inner())
            .one(&*tx)
            .await
            .map_err(map_db_err)?
            .map(account_from_model)
            .transpose()
    }

    async fn find_account_for_wallet(
        &self,
        tx: &mut Self::Tx,
        wallet_id: WalletId,
    ) -> Result<Option<Account>, StoreError> {
        accounts::Entity::find()
            .filter(accounts::Column::WalletId.eq(wallet_id.into_inner()))
            .one(&*tx)
            .await
            .map_err(map_db_err)?
            .map(account_from_model)
            .transpose()
    }

    async fn find_wallet(
        &self,
        tx: &mut Self::Tx,
        id: WalletId,
    ) -> Result<Option<Wallet>, StoreError> {
        Ok(wallets::Entity::find_by_id(id.into_inner())
            .one(&*tx)
            .await
            .map_err(map_db_err)?
            .map(wallet_from_model))
    }

    async fn find_wallet_by_handle(
        &self,
        tx: &mut Self::Tx,
        handle: &str,
    ) -> Result<Option<Wallet>, StoreError> {
        Ok(wallets::Entity::find()
            .filter(wallets::Column::Handle.eq(handle))
            .one(&*tx)
            .await
            .map_err(map_db_err)?
            .map(wallet_from_model))
    }

    async fn find_wallet_by_external_ref(
        &self,
        tx: &mut Self::Tx,
        provider: &str,
        external_ref: &str,
    ) -> Result<Option<Wallet>, StoreError> {
        let identity = external_identities::Entity::find()
            .filter(external_identities::Column::Provider.eq(provider))
            .filter(external_identities::Column::ExternalRef.eq(external_ref))
            .one(&*tx)
            .await
            .map_err(map_db_err)?;
        match identity {
            None => Ok(None),
            Some(identity) => self
                .find_wallet(tx, WalletId::from_uuid(identity.wallet_id))
                .await,
        }
    }

    async fn insert_wallet(&self, tx: &mut Self::Tx, new: NewWallet) -> Result<(), StoreError> {
        wallets::ActiveModel {
            id: Set(new.wallet.id.into_inner()),
            handle: Set(new.wallet.handle),
            display_name: Set(new.wallet.display_name),
            created_at: Set(new.wallet.created_at.into()),
        }
        .insert(&*tx)
        .await
        .map_err(map_db_err)?;

        accounts::ActiveModel {
            id: Set(new.account.id.into_inner()),
            wallet_id: Set(new.account.wallet_id.into_inner()),
            currency: Set(new.account.currency.to_string()),
            account_type: Set(match new.account.account_type {
                AccountType::User => db_enums::AccountType::User,
                AccountType::System => db_enums::AccountType::System,
            }),
            status: Set(match new.account.status {
                AccountStatus::Active => db_enums::AccountStatus::Active,
                AccountStatus::Frozen => db_enums::AccountStatus::Frozen,
            }),
            created_at: Set(new.account.created_at.into()),
        }
        .insert(&*tx)
        .await
        .map_err(map_db_err)?;

        Ok(())
    }

    async fn insert_external_identity(
        &self,
        tx: &mut Self::Tx,
        provider: &str,
        external_ref: &str,
        wallet_id: WalletId,
    ) -> Result<(), StoreError> {
        external_identities::ActiveModel {
            id: Set(Uuid::now_v7()),
            provider: Set(provider.to_string()),
            external_ref: Set(external_ref.to_string()),
            wallet_id: Set(wallet_id.into_inner()),
            created_at: Set(Utc::now().into()),
        }
        .insert(&*tx)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn set_account_status(
        &self,
        tx: &mut Self::Tx,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<(), StoreError> {
        let model = accounts::Entity::find_by_id(id.into_inner())
            .one(&*tx)
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
        let mut active: accounts::ActiveModel = model.into();
        active.status = Set(match status {
            AccountStatus::Active => db_enums::AccountStatus::Active,
            AccountStatus::Frozen => db_enums::AccountStatus::Frozen,
        });
        active.update(&*tx).await.map_err(map_db_err)?;
        Ok(())
    }

    async fn insert_entry(
        &self,
        tx: &mut Self::Tx,
        draft: EntryDraft,
    ) -> Result<JournalEntry, StoreError> {
        posting::validate_lines(&draft.lines)
            .map_err(|e| StoreError::Constraint(format!("unbalanced entry rejected: {e}")))?;

        let now = Utc::now();
        let entry = journal_entries::ActiveModel {
            id: Set(draft.id.into_inner()),
            kind: Set(draft.kind.into()),
            initiator_wallet_id: Set(draft.initiator_wallet_id.into_inner()),
            reference_id: Set(draft.reference_id.clone()),
            metadata: Set(serde_json::Value::Object(draft.metadata.clone())),
            idempotency_key: Set(draft.idempotency_key.clone()),
            linked_entry_id: Set(draft.linked_entry_id.map(EntryId::into_inner)),
            created_at: Set(now.into()),
        }
        .insert(&*tx)
        .await
        .map_err(map_db_err)?;

        for line in &draft.lines {
            journal_lines::ActiveModel {
                id: Set(Uuid::now_v7()),
                entry_id: Set(draft.id.into_inner()),
                account_id: Set(line.account_id.into_inner()),
                side: Set(line.side.into()),
                bucket: Set(line.bucket.into()),
                amount_minor: Set(line.amount.minor_units),
                currency: Set(line.amount.currency.to_string()),
                created_at: Set(now.into()),
            }
            .insert(&*tx)
            .await
            .map_err(map_db_err)?;
        }

        Ok(entry_from_model(entry))
    }

    async fn find_entry(
        &self,
        tx: &mut Self::Tx,
        id: EntryId,
    ) -> Result<Option<JournalEntry>, StoreError> {
        Ok(journal_entries::Entity::find_by_id(id.into_inner())
            .one(&*tx)
            .await
            .map_err(map_db_err)?
            .map(entry_from_model))
    }

    async fn lines_for_entry(
        &self,
        tx: &mut Self::Tx,
        entry_id: EntryId,
    ) -> Result<Vec<JournalLine>, StoreError> {
        journal_lines::Entity::find()
            .filter(journal_lines::Column::EntryId.eq(entry_id.into_inner()))
            .all(&*tx)
            .await
            .map_err(map_db_err)?
            .into_iter()
            .map(line_from_model)
            .collect()
    }

    async fn sum_buckets(
        &self,
        tx: &mut Self::Tx,
        account_id: AccountId,
    ) -> Result<Balances, StoreError> {
        let account = self
            .find_account(tx, account_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("account {account_id}")))?;

        let mut acc = BalanceAccumulator::default();
        for bucket in [Bucket::Available, Bucket::Held] {
            for side in [Side::Debit, Side::Credit] {
                let total: Option<Option<Decimal>> = journal_lines::Entity::find()
                    .select_only()
                    .column_as(journal_lines::Column::AmountMinor.sum(), "total")
                    .filter(journal_lines::Column::AccountId.eq(account_id.into_inner()))
                    .filter(
                        journal_lines::Column::Bucket.eq(db_enums::LineBucket::from(bucket)),
                    )
                    .filter(journal_lines::Column::Side.eq(db_enums::LineSide::from(side)))
                    .into_tuple()
                    .one(&*tx)
                    .await
                    .map_err(map_db_err)?;
                let minor = decimal_sum_to_i64(total.flatten())?;
                acc.add_line(bucket, side, minor)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
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
        let total: Option<Option<Decimal>> = journal_lines::Entity::find()
            .select_only()
            .column_as(journal_lines::Column::AmountMinor.sum(), "total")
            .filter(journal_lines::Column::AccountId.eq(account_id.into_inner()))
            .filter(journal_lines::Column::Side.eq(db_enums::LineSide::Debit))
            .filter(journal_lines::Column::Bucket.eq(db_enums::LineBucket::Available))
            .filter(journal_lines::Column::CreatedAt.gte(since))
            .into_tuple()
            .one(&*tx)
            .await
            .map_err(map_db_err)?;
        decimal_sum_to_i64(total.flatten())
    }

    async fn list_entries_for_account(
        &self,
        tx: &mut Self::Tx,
        account_id: AccountId,
        cursor: Option<EntryId>,
        limit: u32,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let entry_ids: Vec<Uuid> = journal_lines::Entity::find()
            .select_only()
            .column(journal_lines::Column::EntryId)
            .filter(journal_lines::Column::AccountId.eq(account_id.into_inner()))
            .distinct()
            .into_tuple()
            .all(&*tx)
            .await
            .map_err(map_db_err)?;

        let mut query =
            journal_entries::Entity::find().filter(journal_entries::Column::Id.is_in(entry_ids));
        if let Some(cursor) = cursor {
            query = query.filter(journal_entries::Column::Id.lt(cursor.into_inner()));
        }
        // Entry ids are UUID v7: id order is creation order.
        let models = query
            .order_by_desc(journal_entries::Column::Id)
            .limit(u64::from(limit))
            .all(&*tx)
            .await
            .map_err(map_db_err)?;

        Ok(models.into_iter().map(entry_from_model).collect())
    }

    async fn insert_hold(&self, tx: &mut Self::Tx, hold: Hold) -> Result<(), StoreError> {
        holds::ActiveModel {
            id: Set(hold.id.into_inner()),
            account_id: Set(hold.account_id.into_inner()),
            currency: Set(hold.amount.currency.to_string()),
            amount_minor: Set(hold.amount.minor_units),
            remaining_minor: Set(hold.remaining.minor_units),
            status: Set(hold.status.into()),
            expires_at: Set(hold.expires_at.into()),
            entry_id: Set(hold.entry_id.into_inner()),
            created_at: Set(hold.created_at.into()),
        }
        .insert(&*tx)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn find_hold(
        &self,
        tx: &mut Self::Tx,
        id: HoldId,
    ) -> Result<Option<Hold>, StoreError> {
        holds::Entity::find_by_id(id.into_inner())
            .one(&*tx)
            .await
            .map_err(map_db_err)?
            .map(hold_from_model)
            .transpose()
    }

    async fn update_hold(&self, tx: &mut Self::Tx, hold: &Hold) -> Result<(), StoreError> {
        holds::ActiveModel {
            id: Set(hold.id.into_inner()),
            remaining_minor: Set(hold.remaining.minor_units),
            status: Set(hold.status.into()),
            ..Default::default()
        }
        .update(&*tx)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn insert_intent(
        &self,
        tx: &mut Self::Tx,
        intent: PaymentIntent,
    ) -> Result<(), StoreError> {
        payment_intents::ActiveModel {
            id: Set(intent.id.into_inner()),
            payee_account_id: Set(intent.payee_account_id.into_inner()),
            currency: Set(intent.amount.currency.to_string()),
            amount_minor: Set(intent.amount.minor_units),
            status: Set(intent.status.into()),
            expires_at: Set(intent.expires_at.into()),
            metadata: Set(serde_json::Value::Object(intent.metadata)),
            payer_account_id: Set(intent.payer_account_id.map(AccountId::into_inner)),
            paid_entry_id: Set(intent.paid_entry_id.map(EntryId::into_inner)),
            created_at: Set(intent.created_at.into()),
        }
        .insert(&*tx)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn find_intent(
        &self,
        tx: &mut Self::Tx,
        id: IntentId,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        payment_intents::Entity::find_by_id(id.into_inner())
            .one(&*tx)
            .await
            .map_err(map_db_err)?
            .map(intent_from_model)
            .transpose()
    }

    async fn update_intent(
        &self,
        tx: &mut Self::Tx,
        intent: &PaymentIntent,
    ) -> Result<(), StoreError> {
        payment_intents::ActiveModel {
            id: Set(intent.id.into_inner()),
            status: Set(intent.status.into()),
            payer_account_id: Set(intent.payer_account_id.map(AccountId::into_inner)),
            paid_entry_id: Set(intent.paid_entry_id.map(EntryId::into_inner)),
            ..Default::default()
        }
        .update(&*tx)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn insert_refund(&self, tx: &mut Self::Tx, refund: Refund) -> Result<(), StoreError> {
        refunds::ActiveModel {
            id: Set(refund.id.into_inner()),
            capture_entry_id: Set(refund.capture_entry_id.into_inner()),
            amount_minor: Set(refund.amount.minor_units),
            currency: Set(refund.amount.currency.to_string()),
            status: Set(match refund.status {
                RefundStatus::Posted => db_enums::RefundStatus::Posted,
                RefundStatus::Failed => db_enums::RefundStatus::Failed,
            }),
            entry_id: Set(refund.entry_id.into_inner()),
            created_at: Set(refund.created_at.into()),
        }
        .insert(&*tx)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn sum_refunds_for_capture(
        &self,
        tx: &mut Self::Tx,
        capture_entry_id: EntryId,
    ) -> Result<i64, StoreError> {
        let total: Option<Option<Decimal>> = refunds::Entity::find()
            .select_only()
            .column_as(refunds::Column::AmountMinor.sum(), "total")
            .filter(refunds::Column::CaptureEntryId.eq(capture_entry_id.into_inner()))
            .filter(refunds::Column::Status.eq(db_enums::RefundStatus::Posted))
            .into_tuple()
            .one(&*tx)
            .await
            .map_err(map_db_err)?;
        decimal_sum_to_i64(total.flatten())
    }

    async fn idempotency_reserve(
        &self,
        tx: &mut Self::Tx,
        api_key_id: ApiKeyId,
        key: &IdempotencyKey,
        fingerprint: &Fingerprint,
    ) -> Result<IdempotencyReservation, StoreError> {
        let find = || {
            idempotency_records::Entity::find()
                .filter(idempotency_records::Column::ApiKeyId.eq(api_key_id.into_inner()))
                .filter(idempotency_records::Column::IdempotencyKey.eq(key.as_str()))
        };

        if let Some(record) = find().one(&*tx).await.map_err(map_db_err)? {
            return classify_record(&record, fingerprint);
        }

        let insert = idempotency_records::ActiveModel {
            id: Set(Uuid::now_v7()),
            api_key_id: Set(api_key_id.into_inner()),
            idempotency_key: Set(key.as_str().to_string()),
            fingerprint: Set(fingerprint.as_str().to_string()),
            status: Set(db_enums::IdempotencyStatus::InFlight),
            snapshot: Set(None),
            created_at: Set(Utc::now().into()),
        }
        .insert(&*tx)
        .await;

        match insert {
            Ok(_) => Ok(IdempotencyReservation::Fresh),
            Err(err) => {
                let mapped = map_db_err(err);
                if matches!(mapped, StoreError::Constraint(_)) {
                    // A concurrent holder of the unique (api_key, key) index
                    // committed between our select and insert; re-read and
                    // classify. Blocking on that index until the other
                    // transaction finishes is the intended behavior.
                    let record = find()
                        .one(&*tx)
                        .await
                        .map_err(map_db_err)?
                        .ok_or_else(|| {
                            StoreError::Backend(
                                "idempotency record vanished after conflict".to_string(),
                            )
                        })?;
                    classify_record(&record, fingerprint)
                } else {
                    Err(mapped)
                }
            }
        }
    }

    async fn idempotency_complete(
        &self,
        tx: &mut Self::Tx,
        api_key_id: ApiKeyId,
        key: &IdempotencyKey,
        snapshot: &Snapshot,
    ) -> Result<(), StoreError> {
        let record = idempotency_records::Entity::find()
            .filter(idempotency_records::Column::ApiKeyId.eq(api_key_id.into_inner()))
            .filter(idempotency_records::Column::IdempotencyKey.eq(key.as_str()))
            .one(&*tx)
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| {
                StoreError::Backend(
                    "idempotency_complete without a reservation in this transaction".to_string(),
                )
            })?;

        let status = if snapshot.ok {
            db_enums::IdempotencyStatus::Completed
        } else {
            db_enums::IdempotencyStatus::Failed
        };
        let value = serde_json::to_value(snapshot)
            .map_err(|e| StoreError::Backend(format!("unserializable snapshot: {e}")))?;

        let mut active: idempotency_records::ActiveModel = record.into();
        active.status = Set(status);
        active.snapshot = Set(Some(value));
        active.update(&*tx).await.map_err(map_db_err)?;
        Ok(())
    }
}

fn classify_record(
    record: &idempotency_records::Model,
    fingerprint: &Fingerprint,
) -> Result<IdempotencyReservation, StoreError> {
    if record.fingerprint != fingerprint.as_str() {
        return Ok(IdempotencyReservation::Mismatch);
    }
    match record.status {
        db_enums::IdempotencyStatus::InFlight => Ok(IdempotencyReservation::InFlight),
        db_enums::IdempotencyStatus::Completed | db_enums::IdempotencyStatus::Failed => {
            let value = record.snapshot.clone().ok_or_else(|| {
                StoreError::Backend("completed record without snapshot".to_string())
            })?;
            let snapshot: Snapshot = serde_json::from_value(value)
                .map_err(|e| StoreError::Backend(format!("undecodable snapshot: {e}")))?;
            Ok(IdempotencyReservation::Replay(snapshot))
        }
    }
}
