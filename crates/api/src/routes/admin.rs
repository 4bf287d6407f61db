//! Admin routes: wallets, API keys, deposits, freezes, external identities.
//!
//! All handlers here additionally require the ADMIN scope, enforced by the
//! engine (and re-checked locally for the key-repository operations that
//! bypass it).

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use tesoro_core::recipient::RecipientRef;
use tesoro_core::transfer::DepositRequest;
use tesoro_core::wallet::CreateWalletRequest;
use tesoro_core::LedgerError;
use tesoro_shared::types::{AccountId, WalletId};
use tesoro_shared::{Scope, SpendLimits};

use crate::middleware::AuthKey;
use crate::routes::{ledger_error_response, parse_money, require_idempotency_key};
use crate::AppState;

/// Creates the admin routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/wallets", post(create_wallet))
        .route("/admin/api-keys", post(issue_api_key))
        .route("/admin/deposits", post(create_deposit))
        .route("/admin/accounts/{account_id}/freeze", post(freeze_account))
        .route(
            "/admin/accounts/{account_id}/unfreeze",
            post(unfreeze_account),
        )
        .route("/admin/external-identities", post(link_external_identity))
}

/// Request body for creating a wallet.
#[derive(Debug, Deserialize)]
pub struct CreateWalletBody {
    /// Optional `@`-prefixed handle.
    pub handle: Option<String>,
    /// Display name.
    pub display_name: String,
    /// ISO 4217 currency code.
    pub currency: String,
    /// `user` (default) or `system`.
    #[serde(default)]
    pub account_type: Option<String>,
}

/// POST `/v1/admin/wallets` - Create a wallet with its ledger account.
async fn create_wallet(
    State(state): State<AppState>,
    auth: AuthKey,
    Json(payload): Json<CreateWalletBody>,
) -> impl IntoResponse {
    let currency = match payload.currency.parse::<tesoro_shared::Currency>() {
        Ok(currency) => currency,
        Err(e) => return ledger_error_response(&LedgerError::Validation(e)),
    };
    let account_type = match payload.account_type.as_deref() {
        None | Some("user") => tesoro_core::ledger::types::AccountType::User,
        Some("system") => tesoro_core::ledger::types::AccountType::System,
        Some(other) => {
            return ledger_error_response(&LedgerError::Validation(format!(
                "unknown account type: {other}"
            )))
        }
    };

    let request = CreateWalletRequest {
        handle: payload.handle,
        display_name: payload.display_name,
        currency,
        account_type,
    };

    match state.engine.create_wallet(&auth.0, request).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}

/// Request body for issuing an API key.
#[derive(Debug, Deserialize)]
pub struct IssueApiKeyBody {
    /// The wallet the key acts for.
    pub wallet_id: Uuid,
    /// Scope names, e.g. `["read", "transfer"]`.
    pub scopes: Vec<String>,
    /// Per-transaction ceiling in minor units.
    pub per_tx_max: Option<i64>,
    /// Rolling-window ceiling in minor units.
    pub window_max: Option<i64>,
}

/// POST `/v1/admin/api-keys` - Issue an API key; the raw key is returned
/// exactly once.
async fn issue_api_key(
    State(state): State<AppState>,
    auth: AuthKey,
    Json(payload): Json<IssueApiKeyBody>,
) -> impl IntoResponse {
    if !auth.0.has_scope(Scope::Admin) {
        return ledger_error_response(&LedgerError::ForbiddenScope(
            "missing required scope: admin".to_string(),
        ));
    }

    let mut scopes = Vec::with_capacity(payload.scopes.len());
    for raw in &payload.scopes {
        match raw.parse::<Scope>() {
            Ok(scope) => scopes.push(scope),
            Err(e) => return ledger_error_response(&LedgerError::Validation(e)),
        }
    }

    let limits = SpendLimits {
        per_tx_max: payload.per_tx_max,
        window_max: payload.window_max,
    };

    match state
        .api_keys
        .issue(WalletId::from_uuid(payload.wallet_id), &scopes, limits)
        .await
    {
        Ok(issued) => (
            StatusCode::CREATED,
            Json(json!({
                "id": issued.id,
                "key": issued.raw_key
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "API key issue failed");
            ledger_error_response(&LedgerError::Store(e.to_string()))
        }
    }
}

/// Request body for a deposit.
#[derive(Debug, Deserialize)]
pub struct CreateDepositBody {
    /// Recipient: wallet id, `@handle`, or `ext:provider:ref`.
    pub to: String,
    /// Decimal amount string.
    pub amount: String,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Reference from the external payment system.
    pub reference_id: Option<String>,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// POST `/v1/admin/deposits` - Credit a wallet from the system treasury.
async fn create_deposit(
    State(state): State<AppState>,
    auth: AuthKey,
    headers: HeaderMap,
    Json(payload): Json<CreateDepositBody>,
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

    let request = DepositRequest {
        to,
        amount,
        reference_id: payload.reference_id,
        metadata: payload.metadata,
    };

    match state.engine.deposit(&auth.0, &idempotency_key, request).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}

/// POST `/v1/admin/accounts/{account_id}/freeze`
async fn freeze_account(
    State(state): State<AppState>,
    auth: AuthKey,
    Path(account_id): Path<Uuid>,
) -> impl IntoResponse {
    set_frozen(state, auth, account_id, true).await
}

/// POST `/v1/admin/accounts/{account_id}/unfreeze`
async fn unfreeze_account(
    State(state): State<AppState>,
    auth: AuthKey,
    Path(account_id): Path<Uuid>,
) -> impl IntoResponse {
    set_frozen(state, auth, account_id, false).await
}

async fn set_frozen(
    state: AppState,
    auth: AuthKey,
    account_id: Uuid,
    frozen: bool,
) -> axum::response::Response {
    match state
        .engine
        .set_account_frozen(&auth.0, AccountId::from_uuid(account_id), frozen)
        .await
    {
        Ok(status) => (
            StatusCode::OK,
            Json(json!({
                "account_id": account_id,
                "status": status
            })),
        )
            .into_response(),
        Err(e) => ledger_error_response(&e),
    }
}

/// Request body for linking an external identity.
#[derive(Debug, Deserialize)]
pub struct LinkExternalIdentityBody {
    /// Wallet to map the identity onto.
    pub wallet_id: Uuid,
    /// External system name.
    pub provider: String,
    /// Identifier within that system.
    pub reference: String,
}

/// POST `/v1/admin/external-identities`
async fn link_external_identity(
    State(state): State<AppState>,
    auth: AuthKey,
    Json(payload): Json<LinkExternalIdentityBody>,
) -> impl IntoResponse {
    match state
        .engine
        .link_external_identity(
            &auth.0,
            WalletId::from_uuid(payload.wallet_id),
            &payload.provider,
            &payload.reference,
        )
        .await
    {
        Ok(()) => (StatusCode::CREATED, Json(json!({ "linked": true }))).into_response(),
        Err(e) => ledger_error_response(&e),
    }
}
