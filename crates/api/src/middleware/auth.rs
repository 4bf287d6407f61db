//! API-key authentication middleware for protected routes.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use tesoro_db::repositories::api_key::ApiKeyError;
use tesoro_shared::ApiKeyIdentity;

use crate::AppState;

/// Extracts the bearer token from the Authorization header.
fn extract_bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
}

/// Authentication middleware that validates API keys.
///
/// This middleware:
/// 1. Extracts the Bearer token from the Authorization header
/// 2. Resolves it to an [`ApiKeyIdentity`] through the key repository
/// 3. Stores the identity in request extensions for handlers to access
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(token) = auth_header.and_then(extract_bearer_token) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "MISSING_API_KEY",
                "message": "Authorization header with Bearer token is required"
            })),
        )
            .into_response();
    };

    match state.api_keys.authenticate(token).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(ApiKeyError::Revoked) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "API_KEY_REVOKED",
                "message": "API key has been revoked"
            })),
        )
            .into_response(),
        Err(ApiKeyError::InvalidKey) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "INVALID_API_KEY",
                "message": "Invalid API key"
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "API key authentication failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "STORE_ERROR",
                    "message": "An error occurred"
                })),
            )
                .into_response()
        }
    }
}

/// Extractor for the authenticated API-key identity.
///
/// Use this in handlers to get the caller:
///
/// ```ignore
/// async fn handler(auth: AuthKey) -> impl IntoResponse {
///     let wallet = auth.0.wallet_id;
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthKey(pub ApiKeyIdentity);

impl<S> FromRequestParts<S> for AuthKey
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ApiKeyIdentity>()
            .cloned()
            .map(AuthKey)
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({
                        "error": "UNAUTHORIZED",
                        "message": "Authentication required"
                    })),
                )
            })
    }
}
