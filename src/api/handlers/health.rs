//! Health check endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "huddle",
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "meetings": state.registry.meeting_count(),
            "connections": state.registry.connection_count(),
            "database": state.db.stats(),
        })),
    )
}
