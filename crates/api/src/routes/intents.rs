//! Payment intent routes: create, pay, cancel.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use tesoro_core::intent::{IntentCancelRequest, IntentCreateRequest, IntentPayRequest};
use tesoro_shared::types::IntentId;

use crate::middleware::AuthKey;
use crate::routes::{ledger_error_response, parse_money, require_idempotency_key};
use crate::AppState;

/// Creates the payment intent routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payment-intents", post(create_intent))
        .route("/payment-intents/{intent_id}/pay", post(pay_intent))
        .route("/payment-intents/{intent_id}/cancel", post(cancel_intent))
}

/// Request body for creating a payment intent.
#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    /// Decimal amount string.
    pub amount: String,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Intent lifetime in seconds, `1..=86400`.
    pub expires_in_seconds: i64,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// POST `/v1/payment-intents` - Request a payment into the caller's wallet.
async fn create_intent(
    State(state): State<AppState>,
    auth: AuthKey,
    headers: HeaderMap,
    Json(payload): Json<CreateIntentRequest>,
) -> impl IntoResponse {
    let idempotency_key = match require_idempotency_key(&headers) {
        Ok(key) => key,
        Err(response) => return response,
    };
    let amount = match parse_money(&payload.amount, &payload.currency) {
        Ok(amount) => amount,
        Err(response) => return response,
    };

    let request = IntentCreateRequest {
        amount,
        expires_in_seconds: payload.expires_in_seconds,
        metadata: payload.metadata,
    };

    match state
        .engine
        .intent_create(&auth.0, &idempotency_key, request)
        .await
    {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}

/// POST `/v1/payment-intents/{intent_id}/pay` - Pay a pending intent.
async fn pay_intent(
    State(state): State<AppState>,
    auth: AuthKey,
    headers: HeaderMap,
    Path(intent_id): Path<Uuid>,
) -> impl IntoResponse {
    let idempotency_key = match require_idempotency_key(&headers) {
        Ok(key) => key,
        Err(response) => return response,
    };

    let request = IntentPayRequest {
        intent_id: IntentId::from_uuid(intent_id),
    };

    match state
        .engine
        .intent_pay(&auth.0, &idempotency_key, request)
        .await
    {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}

/// POST `/v1/payment-intents/{intent_id}/cancel` - Cancel a pending intent.
async fn cancel_intent(
    State(state): State<AppState>,
    auth: AuthKey,
    headers: HeaderMap,
    Path(intent_id): Path<Uuid>,
) -> impl IntoResponse {
    let idempotency_key = match require_idempotency_key(&headers) {
        Ok(key) => key,
        Err(response) => return response,
    };

    let request = IntentCancelRequest {
        intent_id: IntentId::from_uuid(intent_id),
    };

    match state
        .engine
        .intent_cancel(&auth.0, &idempotency_key, request)
        .await
    {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}
