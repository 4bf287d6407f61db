//! Wallet read routes: balance, transaction history, recipient resolution.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::middleware::AuthKey;
use crate::routes::ledger_error_response;
use crate::AppState;

/// Creates the wallet routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/wallet/balance", get(get_balance))
        .route("/wallet/transactions", get(list_transactions))
        .route("/resolve", get(resolve))
}

/// Query parameters for listing transactions.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Cursor from a previous page.
    pub cursor: Option<String>,
    /// Page size (default 50, max 100).
    pub limit: Option<u32>,
}

/// Query parameters for recipient resolution.
#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    /// The recipient reference to resolve.
    pub to: String,
}

/// GET `/v1/wallet/balance` - Derived balances for the caller's wallet.
async fn get_balance(State(state): State<AppState>, auth: AuthKey) -> impl IntoResponse {
    match state.engine.balance(&auth.0).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}

/// GET `/v1/wallet/transactions` - Newest-first entry history.
async fn list_transactions(
    State(state): State<AppState>,
    auth: AuthKey,
    Query(query): Query<ListTransactionsQuery>,
) -> impl IntoResponse {
    match state
        .engine
        .list_transactions(&auth.0, query.cursor.as_deref(), query.limit)
        .await
    {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}

/// GET `/v1/resolve?to=` - Resolve a recipient reference.
async fn resolve(
    State(state): State<AppState>,
    auth: AuthKey,
    Query(query): Query<ResolveQuery>,
) -> impl IntoResponse {
    match state.engine.resolve_recipient(&auth.0, &query.to).await {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}
