use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::error;

use arogya_core::utils::iso_timestamp_utc;

use crate::router::AppState;

/// `GET /health`: liveness plus the number of open sessions.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.inbox.dispatcher().store().len().await {
        Ok(sessions) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "sessions": sessions,
                "time": iso_timestamp_utc(),
            })),
        ),
        Err(e) => {
            error!(error = %e, "session store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "time": iso_timestamp_utc() })),
            )
        }
    }
}
