//! Liveness endpoint.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use serde_json::json;

use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/health
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<serde_json::Value>> {
    let start = Instant::now();
    Json(ApiResponse::success(
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "model": &state.config.model.model,
        }),
        start,
    ))
}
