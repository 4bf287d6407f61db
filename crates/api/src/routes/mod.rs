//! REST API routes.

pub mod admin;
pub mod health;
pub mod holds;
pub mod intents;
pub mod refunds;
pub mod transfers;
pub mod wallets;

use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;

use tesoro_core::LedgerError;
use tesoro_shared::{Currency, Money, MoneyError};

use crate::middleware::auth_middleware;
use crate::AppState;

/// Assembles the versioned API surface.
pub fn api_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .merge(wallets::routes())
        .merge(transfers::routes())
        .merge(holds::routes())
        .merge(intents::routes())
        .merge(refunds::routes())
        .merge(admin::routes())
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new().merge(health::routes()).merge(protected)
}

/// Maps a ledger error onto the adapter's response shape.
pub(crate) fn ledger_error_response(err: &LedgerError) -> Response {
    let status = StatusCode::from_u16(err.http_status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(error = %err, code = err.error_code(), "ledger operation failed");
    }
    (
        status,
        Json(json!({
            "error": err.error_code(),
            "message": err.to_string()
        })),
    )
        .into_response()
}

/// Pulls the mandatory `Idempotency-Key` header off a write request.
pub(crate) fn require_idempotency_key(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .ok_or_else(|| {
            ledger_error_response(&LedgerError::Validation(
                "Idempotency-Key header is required".to_string(),
            ))
        })
}

/// Parses a decimal amount string against a currency code.
pub(crate) fn parse_money(amount: &str, currency: &str) -> Result<Money, Response> {
    let currency: Currency = currency.parse().map_err(|e: String| {
        ledger_error_response(&LedgerError::Validation(e))
    })?;
    Money::parse(amount, currency).map_err(|e| {
        let err = match e {
            MoneyError::Overflow => LedgerError::Arithmetic,
            other => LedgerError::Validation(other.to_string()),
        };
        ledger_error_response(&err)
    })
}
