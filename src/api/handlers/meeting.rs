//! Meeting handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::HuddleError;
use crate::models::{CreateMeetingRequest, JoinMeetingRequest, Meeting};
use crate::repository::MeetingRepository;

/// Create a new meeting
pub async fn create_meeting(
    State(state): State<AppState>,
    Json(req): Json<CreateMeetingRequest>,
) -> Result<impl IntoResponse, HuddleError> {
    let created_by = req.created_by.trim();
    if created_by.is_empty() {
        return Err(HuddleError::InvalidRequest("createdBy is required".to_string()));
    }

    let repo = MeetingRepository::new(state.db.pool().clone());
    let meeting = repo.create(&Meeting::new(req.title.trim(), created_by)).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Meeting created successfully",
            "meeting": meeting,
        })),
    ))
}

/// Join an existing, active meeting
pub async fn join_meeting(
    State(state): State<AppState>,
    Json(req): Json<JoinMeetingRequest>,
) -> Result<impl IntoResponse, HuddleError> {
    if req.meeting_id.trim().is_empty() {
        return Err(HuddleError::InvalidRequest("meetingId is required".to_string()));
    }
    if req.user_id.trim().is_empty() {
        return Err(HuddleError::InvalidRequest("userId is required".to_string()));
    }

    let repo = MeetingRepository::new(state.db.pool().clone());
    let meeting = repo
        .get_by_meeting_id(&req.meeting_id)
        .await?
        .ok_or_else(|| HuddleError::MeetingNotFound {
            id: req.meeting_id.clone(),
        })?;

    if !meeting.is_active {
        return Err(HuddleError::MeetingInactive { id: meeting.meeting_id });
    }

    let meeting = if meeting.has_participant(&req.user_id) {
        meeting
    } else {
        let updated = repo
            .add_participant(&req.meeting_id, &req.user_id)
            .await?
            .ok_or_else(|| HuddleError::MeetingNotFound {
                id: req.meeting_id.clone(),
            })?;
        info!(
            meeting_id = %req.meeting_id,
            user_id = %req.user_id,
            "Participant joined meeting"
        );
        updated
    };

    Ok(Json(json!({
        "message": "Joined meeting successfully",
        "meeting": meeting,
    })))
}

/// Get a meeting by its public id
pub async fn get_meeting(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HuddleError> {
    let repo = MeetingRepository::new(state.db.pool().clone());

    match repo.get_by_meeting_id(&id).await? {
        Some(meeting) => Ok(Json(json!({ "meeting": meeting }))),
        None => Err(HuddleError::MeetingNotFound { id }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    use crate::api::routes::create_router;
    use crate::api::server::test_support::{test_config, test_state};
    use crate::hub::gateway::memory::MemoryGateway;

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_requires_creator() {
        let router = create_router(test_state(
            test_config(),
            Arc::new(MemoryGateway::default()),
        ));

        let response = router
            .oneshot(post_json("/api/meetings", r#"{"title":"Standup","createdBy":"  "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_join_requires_meeting_id() {
        let router = create_router(test_state(
            test_config(),
            Arc::new(MemoryGateway::default()),
        ));

        let response = router
            .oneshot(post_json(
                "/api/meetings/join",
                r#"{"meetingId":"","userId":"alice"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("meetingId"));
    }
}
