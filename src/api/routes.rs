//! API route definitions

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;
use super::websocket;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Meetings
        .route("/meetings", post(handlers::meeting::create_meeting))
        .route("/meetings/join", post(handlers::meeting::join_meeting))
        .route("/meetings/:id", get(handlers::meeting::get_meeting))
        // Chat history
        .route("/chat/:meeting_id", get(handlers::chat::chat_history))
        // Meeting socket
        .route("/ws", get(websocket::meeting::meeting_ws))
}
