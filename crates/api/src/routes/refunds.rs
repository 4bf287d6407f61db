//! Refund routes.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use tesoro_core::refund::RefundRequest;
use tesoro_shared::types::EntryId;

use crate::middleware::AuthKey;
use crate::routes::{ledger_error_response, parse_money, require_idempotency_key};
use crate::AppState;

/// Creates the refund routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/refunds", post(create_refund))
}

/// Request body for creating a refund.
#[derive(Debug, Deserialize)]
pub struct CreateRefundRequest {
    /// The capture entry to refund.
    pub capture_entry_id: Uuid,
    /// Decimal amount string; defaults to everything refundable.
    pub amount: Option<String>,
    /// Currency of the explicit amount.
    pub currency: Option<String>,
}

/// POST `/v1/refunds` - Refund a capture, fully or partially.
async fn create_refund(
    State(state): State<AppState>,
    auth: AuthKey,
    headers: HeaderMap,
    Json(payload): Json<CreateRefundRequest>,
) -> impl IntoResponse {
    let idempotency_key = match require_idempotency_key(&headers) {
        Ok(key) => key,
        Err(response) => return response,
    };
    let amount = match (&payload.amount, &payload.currency) {
        (None, _) => None,
        (Some(amount), Some(currency)) => match parse_money(amount, currency) {
            Ok(amount) => Some(amount),
            Err(response) => return response,
        },
        (Some(_), None) => {
            return ledger_error_response(&tesoro_core::LedgerError::Validation(
                "currency is required with an explicit amount".to_string(),
            ))
        }
    };

    let request = RefundRequest {
        capture_entry_id: EntryId::from_uuid(payload.capture_entry_id),
        amount,
    };

    match state.engine.refund(&auth.0, &idempotency_key, request).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}
