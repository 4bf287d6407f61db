//! Shared harness for engine integration tests: an in-memory store, a
//! seeded system treasury, and helpers to mint funded user wallets.
#![allow(dead_code)]

use std::sync::Arc;

use uuid::Uuid;

use tesoro_core::engine::LedgerEngine;
use tesoro_core::ledger::types::AccountType;
use tesoro_core::recipient::RecipientRef;
use tesoro_core::store::memory::InMemoryLedgerStore;
use tesoro_core::transfer::DepositRequest;
use tesoro_core::wallet::CreateWalletRequest;
use tesoro_shared::config::LedgerConfig;
use tesoro_shared::types::{ApiKeyId, WalletId};
use tesoro_shared::{ApiKeyIdentity, Currency, Money, Scope, SpendLimits};

pub struct Harness {
    pub store: Arc<InMemoryLedgerStore>,
    pub engine: LedgerEngine<InMemoryLedgerStore>,
    pub admin: ApiKeyIdentity,
}

pub fn usd(minor: i64) -> Money {
    Money::from_minor(minor, Currency::Usd)
}

/// A fresh idempotency key.
pub fn key() -> String {
    format!("test-{}", Uuid::new_v4())
}

pub fn all_user_scopes() -> Vec<Scope> {
    vec![
        Scope::Read,
        Scope::Transfer,
        Scope::Hold,
        Scope::Capture,
        Scope::Refund,
        Scope::IntentCreate,
        Scope::IntentPay,
    ]
}

impl Harness {
    /// Builds an engine with default tuning and seeds the treasury.
    pub async fn new() -> Self {
        Self::with_config(LedgerConfig::default()).await
    }

    pub async fn with_config(config: LedgerConfig) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = LedgerEngine::new(Arc::clone(&store), &config);

        let bootstrap = ApiKeyIdentity {
            api_key_id: ApiKeyId::new(),
            wallet_id: WalletId::new(),
            scopes: vec![Scope::Admin],
            limits: SpendLimits::unlimited(),
        };
        let treasury = engine
            .create_wallet(
                &bootstrap,
                CreateWalletRequest {
                    handle: Some("@treasury".to_string()),
                    display_name: "System Treasury".to_string(),
                    currency: Currency::Usd,
                    account_type: AccountType::System,
                },
            )
            .await
            .expect("treasury seed failed");

        let admin = ApiKeyIdentity {
            api_key_id: ApiKeyId::new(),
            wallet_id: treasury.wallet_id,
            scopes: vec![Scope::Admin, Scope::Read],
            limits: SpendLimits::unlimited(),
        };

        Self {
            store,
            engine,
            admin,
        }
    }

    /// Creates a user wallet with a handle and an opening balance, returning
    /// an identity holding every user scope.
    pub async fn user(&self, handle: &str, opening_minor: i64) -> ApiKeyIdentity {
        self.user_with(handle, opening_minor, all_user_scopes(), SpendLimits::unlimited())
            .await
    }

    pub async fn user_with(
        &self,
        handle: &str,
        opening_minor: i64,
        scopes: Vec<Scope>,
        limits: SpendLimits,
    ) -> ApiKeyIdentity {
        let created = self
            .engine
            .create_wallet(
                &self.admin,
                CreateWalletRequest {
                    handle: Some(handle.to_string()),
                    display_name: handle.trim_start_matches('@').to_string(),
                    currency: Currency::Usd,
                    account_type: AccountType::User,
                },
            )
            .await
            .expect("wallet create failed");

        if opening_minor > 0 {
            self.engine
                .deposit(
                    &self.admin,
                    &key(),
                    DepositRequest {
                        to: RecipientRef::Handle(handle.to_string()),
                        amount: usd(opening_minor),
                        reference_id: None,
                        metadata: serde_json::Map::new(),
                    },
                )
                .await
                .expect("opening deposit failed");
        }

        ApiKeyIdentity {
            api_key_id: ApiKeyId::new(),
            wallet_id: created.wallet_id,
            scopes,
            limits,
        }
    }

    /// The caller's available balance in minor units.
    pub async fn available(&self, identity: &ApiKeyIdentity) -> i64 {
        self.engine
            .balance(identity)
            .await
            .expect("balance read failed")
            .available
    }

    /// The caller's held balance in minor units.
    pub async fn held(&self, identity: &ApiKeyIdentity) -> i64 {
        self.engine
            .balance(identity)
            .await
            .expect("balance read failed")
            .held
    }

    /// Rewrites a hold's expiry into the past, simulating elapsed time.
    pub async fn force_hold_expiry(&self, hold_id: tesoro_shared::types::HoldId) {
        use tesoro_core::store::LedgerStore;
        let mut tx = self.store.begin().await.unwrap();
        let mut hold = self
            .store
            .find_hold(&mut tx, hold_id)
            .await
            .unwrap()
            .expect("hold missing");
        hold.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        self.store.update_hold(&mut tx, &hold).await.unwrap();
        self.store.commit(tx).await.unwrap();
    }

    /// Rewrites an intent's expiry into the past, simulating elapsed time.
    pub async fn force_intent_expiry(&self, intent_id: tesoro_shared::types::IntentId) {
        use tesoro_core::store::LedgerStore;
        let mut tx = self.store.begin().await.unwrap();
        let mut intent = self
            .store
            .find_intent(&mut tx, intent_id)
            .await
            .unwrap()
            .expect("intent missing");
        intent.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        self.store.update_intent(&mut tx, &intent).await.unwrap();
        self.store.commit(tx).await.unwrap();
    }
}
