//! HTTP API layer with Axum routes and middleware.
//!
//! A thin adapter over `tesoro-core`: it authenticates API keys, validates
//! request shapes, extracts the `Idempotency-Key` header, delegates to the
//! ledger engine, and maps [`tesoro_core::LedgerError`] onto status codes.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tesoro_core::LedgerEngine;
use tesoro_db::{ApiKeyRepository, SeaOrmLedgerStore};

/// The engine type served by this adapter.
pub type Engine = LedgerEngine<SeaOrmLedgerStore>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The ledger engine.
    pub engine: Arc<Engine>,
    /// API-key lookups for the auth middleware.
    pub api_keys: Arc<ApiKeyRepository>,
}

/// Creates the main application router.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
