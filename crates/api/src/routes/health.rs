//! Health check route.

use axum::{routing::get, Json, Router};
use serde_json::json;

use crate::AppState;

/// Creates the health routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "service": "tesoro",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok"
    }))
}
