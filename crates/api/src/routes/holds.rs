//! Hold routes: create, capture, release.

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

use tesoro_core::hold::{HoldCaptureRequest, HoldCreateRequest, HoldReleaseRequest};
use tesoro_core::recipient::RecipientRef;
use tesoro_shared::types::HoldId;

use crate::middleware::AuthKey;
use crate::routes::{ledger_error_response, parse_money, require_idempotency_key};
use crate::AppState;

/// Creates the hold routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/holds", post(create_hold))
        .route("/holds/{hold_id}/capture", post(capture_hold))
        .route("/holds/{hold_id}/release", post(release_hold))
}

/// Request body for creating a hold.
#[derive(Debug, Deserialize)]
pub struct CreateHoldRequest {
    /// Decimal amount string.
    pub amount: String,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Hold lifetime in seconds, `1..=86400`.
    pub expires_in_seconds: i64,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Request body for capturing a hold.
#[derive(Debug, Deserialize)]
pub struct CaptureHoldRequest {
    /// Recipient of the captured funds.
    pub to: String,
    /// Decimal amount string; defaults to the full remainder.
    pub amount: Option<String>,
    /// Currency of the explicit amount; defaults to the hold's currency.
    pub currency: Option<String>,
}

/// POST `/v1/holds` - Reserve available funds.
async fn create_hold(
    State(state): State<AppState>,
    auth: AuthKey,
    headers: HeaderMap,
    Json(payload): Json<CreateHoldRequest>,
) -> impl IntoResponse {
    let idempotency_key = match require_idempotency_key(&headers) {
        Ok(key) => key,
        Err(response) => return response,
    };
    let amount = match parse_money(&payload.amount, &payload.currency) {
        Ok(amount) => amount,
        Err(response) => return response,
    };

    let request = HoldCreateRequest {
        amount,
        expires_in_seconds: payload.expires_in_seconds,
        metadata: payload.metadata,
    };

    match state
        .engine
        .hold_create(&auth.0, &idempotency_key, request)
        .await
    {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}

/// POST `/v1/holds/{hold_id}/capture` - Capture held funds to a recipient.
async fn capture_hold(
    State(state): State<AppState>,
    auth: AuthKey,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
    Json(payload): Json<CaptureHoldRequest>,
) -> impl IntoResponse {
    let idempotency_key = match require_idempotency_key(&headers) {
        Ok(key) => key,
        Err(response) => return response,
    };
    let to = match RecipientRef::parse(&payload.to) {
        Ok(to) => to,
        Err(e) => return ledger_error_response(&e),
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

    let request = HoldCaptureRequest {
        hold_id: HoldId::from_uuid(hold_id),
        to,
        amount,
    };

    match state
        .engine
        .hold_capture(&auth.0, &idempotency_key, request)
        .await
    {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}

/// POST `/v1/holds/{hold_id}/release` - Return the remainder to available.
async fn release_hold(
    State(state): State<AppState>,
    auth: AuthKey,
    headers: HeaderMap,
    Path(hold_id): Path<Uuid>,
) -> impl IntoResponse {
    let idempotency_key = match require_idempotency_key(&headers) {
        Ok(key) => key,
        Err(response) => return response,
    };

    let request = HoldReleaseRequest {
        hold_id: HoldId::from_uuid(hold_id),
    };

    match state
        .engine
        .hold_release(&auth.0, &idempotency_key, request)
        .await
    {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}
