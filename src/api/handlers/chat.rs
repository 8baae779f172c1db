//! Chat history handler

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::api::server::AppState;
use crate::error::HuddleError;
use crate::models::ChatHistory;
use crate::repository::ChatRepository;

/// Stored chat for a meeting, oldest first
pub async fn chat_history(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
) -> Result<impl IntoResponse, HuddleError> {
    if meeting_id.trim().is_empty() {
        return Err(HuddleError::InvalidRequest("Meeting ID is required".to_string()));
    }

    let repo = ChatRepository::new(state.db.pool().clone());
    let messages = repo.list_for_meeting(&meeting_id).await?;

    Ok(Json(ChatHistory::from(messages)))
}
