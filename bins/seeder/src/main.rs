//! Database seeder for Tesoro development and testing.
//!
//! Seeds the system treasury, two demo wallets (@alice and @store), API keys
//! for each, and opening deposits.
//!
//! Usage: cargo run --bin seeder

use std::sync::Arc;

use uuid::Uuid;

use tesoro_core::ledger::types::AccountType;
use tesoro_core::recipient::RecipientRef;
use tesoro_core::transfer::DepositRequest;
use tesoro_core::wallet::CreateWalletRequest;
use tesoro_core::LedgerEngine;
use tesoro_db::{ApiKeyRepository, SeaOrmLedgerStore};
use tesoro_shared::types::WalletId;
use tesoro_shared::{ApiKeyIdentity, AppConfig, Currency, Money, Scope, SpendLimits};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().expect("Failed to load configuration");

    println!("Connecting to database...");
    let db = tesoro_db::connect(&config.database)
        .await
        .expect("Failed to connect to database");

    let store = Arc::new(SeaOrmLedgerStore::new(db.clone()));
    let engine = LedgerEngine::new(store, &config.ledger);
    let api_keys = ApiKeyRepository::new(db);

    // A synthetic admin identity for seeding; real admin keys are issued
    // below against the treasury wallet.
    let mut admin = ApiKeyIdentity {
        api_key_id: tesoro_shared::types::ApiKeyId::new(),
        wallet_id: WalletId::new(),
        scopes: vec![Scope::Admin],
        limits: SpendLimits::unlimited(),
    };

    println!("Seeding treasury wallet...");
    let treasury = match engine
        .create_wallet(
            &admin,
            CreateWalletRequest {
                handle: Some("@treasury".to_string()),
                display_name: "System Treasury".to_string(),
                currency: Currency::Usd,
                account_type: AccountType::System,
            },
        )
        .await
    {
        Ok(created) => {
            println!("  treasury wallet: {}", created.wallet_id);
            created.wallet_id
        }
        Err(e) => {
            println!("  treasury already seeded or failed: {e}");
            return;
        }
    };
    admin.wallet_id = treasury;

    let admin_key = api_keys
        .issue(treasury, &[Scope::Admin, Scope::Read], SpendLimits::unlimited())
        .await
        .expect("Failed to issue admin key");
    println!("  admin API key (save this, shown once): {}", admin_key.raw_key);

    for (handle, name, opening) in [
        ("@alice", "Alice", "1000.00"),
        ("@store", "Demo Store", "0.00"),
    ] {
        println!("Seeding {handle}...");
        let created = engine
            .create_wallet(
                &admin,
                CreateWalletRequest {
                    handle: Some(handle.to_string()),
                    display_name: name.to_string(),
                    currency: Currency::Usd,
                    account_type: AccountType::User,
                },
            )
            .await
            .expect("Failed to create wallet");

        let amount =
            Money::parse(opening, Currency::Usd).expect("Failed to parse opening amount");
        if amount.is_positive() {
            engine
                .deposit(
                    &admin,
                    &format!("seed-{}", Uuid::now_v7()),
                    DepositRequest {
                        to: RecipientRef::Handle(handle.to_string()),
                        amount,
                        reference_id: Some("seed".to_string()),
                        metadata: serde_json::Map::new(),
                    },
                )
                .await
                .expect("Failed to post opening deposit");
        }

        let issued = api_keys
            .issue(
                created.wallet_id,
                &[
                    Scope::Read,
                    Scope::Transfer,
                    Scope::Hold,
                    Scope::Capture,
                    Scope::Refund,
                    Scope::IntentCreate,
                    Scope::IntentPay,
                ],
                SpendLimits::unlimited(),
            )
            .await
            .expect("Failed to issue API key");
        println!("  {handle} wallet: {}", created.wallet_id);
        println!("  {handle} API key (save this, shown once): {}", issued.raw_key);
    }

    println!("Seeding complete!");
}
