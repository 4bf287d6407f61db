//! Transfer routes.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use tesoro_core::recipient::RecipientRef;
use tesoro_core::transfer::TransferRequest;

use crate::middleware::AuthKey;
use crate::routes::{ledger_error_response, parse_money, require_idempotency_key};
use crate::AppState;

/// Creates the transfer routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/transfers", post(create_transfer))
}

/// Request body for creating a transfer.
#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    /// Recipient: wallet id, `@handle`, or `ext:provider:ref`.
    pub to: String,
    /// Decimal amount string, e.g. `"25.00"`.
    pub amount: String,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Optional client reference.
    pub reference_id: Option<String>,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// POST `/v1/transfers` - Move available funds to another wallet.
async fn create_transfer(
    State(state): State<AppState>,
    auth: AuthKey,
    headers: HeaderMap,
    Json(payload): Json<CreateTransferRequest>,
) -> impl IntoResponse {
    let idempotency_key = match require_idempotency_key(&headers) {
        Ok(key) => key,
        Err(response) => return response,
    };
    let amount = match parse_money(&payload.amount, &payload.currency) {
        Ok(amount) => amount,
        Err(response) => return response,
    };
    let to = match RecipientRef::parse(&payload.to) {
        Ok(to) => to,
        Err(e) => return ledger_error_response(&e),
    };

    let request = TransferRequest {
        to,
        amount,
        reference_id: payload.reference_id,
        metadata: payload.metadata,
    };

    match state.engine.transfer(&auth.0, &idempotency_key, request).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}
