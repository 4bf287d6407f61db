//! Tesoro API Server
//!
//! Main entry point for the Tesoro wallet backend service.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tesoro_api::{create_router, AppState};
use tesoro_core::LedgerEngine;
use tesoro_db::{connect, ApiKeyRepository, SeaOrmLedgerStore};
use tesoro_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tesoro=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = AppConfig::load().expect("Failed to load configuration");

    // Connect to database
    let db = connect(&config.database).await?;
    info!("Connected to database");

    // Build the ledger engine over the SQL store
    let store = Arc::new(SeaOrmLedgerStore::new(db.clone()));
    let engine = Arc::new(LedgerEngine::new(store, &config.ledger));
    info!(
        max_commit_retries = config.ledger.max_commit_retries,
        spend_window_secs = config.ledger.spend_window_secs,
        "Ledger engine configured"
    );

    // Create application state
    let state = AppState {
        engine,
        api_keys: Arc::new(ApiKeyRepository::new(db)),
    };

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
