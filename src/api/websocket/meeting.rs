//! Meeting socket endpoint
//!
//! Admission runs before the upgrade is accepted: origin, meeting id and
//! meeting existence are all checked while a plain HTTP error can still be
//! returned. After the upgrade the socket is handed to a hub session.

use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::api::server::AppState;
use crate::error::{HuddleError, Result};
use crate::hub::{Connection, Identity, PersistenceGateway, Session};

/// Query parameters accepted on upgrade
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSocketParams {
    pub meeting_id: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

impl MeetingSocketParams {
    /// Identity supplied up front, if any
    pub fn identity(&self) -> Option<Identity> {
        let user_id = self.user_id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some(Identity::new(
            user_id,
            self.user_name.clone().unwrap_or_default(),
            self.user_email.clone().unwrap_or_default(),
        ))
    }
}

/// Decide whether an upgrade may proceed, returning the meeting id it binds to
pub async fn admit(
    params: &MeetingSocketParams,
    origin: Option<&str>,
    allowed_origins: &[String],
    gateway: &dyn PersistenceGateway,
    lookup_timeout: Duration,
) -> Result<String> {
    if !allowed_origins.is_empty() {
        let origin = origin.unwrap_or_default();
        if !allowed_origins.iter().any(|allowed| allowed == origin) {
            return Err(HuddleError::OriginNotAllowed(origin.to_string()));
        }
    }

    let meeting_id = params
        .meeting_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HuddleError::InvalidRequest("meetingId is required".to_string()))?;

    if !timeout(lookup_timeout, gateway.meeting_exists(meeting_id)).await?? {
        return Err(HuddleError::MeetingNotFound {
            id: meeting_id.to_string(),
        });
    }

    Ok(meeting_id.to_string())
}

/// WebSocket handler for meeting chat and signaling
pub async fn meeting_ws(
    State(state): State<AppState>,
    Query(params): Query<MeetingSocketParams>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> std::result::Result<Response, HuddleError> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());

    let meeting_id = admit(
        &params,
        origin,
        &state.config.api.allowed_origins,
        state.gateway.as_ref(),
        state.config.hub.persist_timeout,
    )
    .await
    .inspect_err(|e| warn!("Rejected meeting socket: {}", e))?;

    let Some(ws) = ws else {
        return Ok((
            StatusCode::UPGRADE_REQUIRED,
            Json(json!({ "error": "WebSocket upgrade required" })),
        )
            .into_response());
    };

    let identity = params.identity();
    Ok(ws
        .max_message_size(state.config.hub.max_message_bytes)
        .on_upgrade(move |socket| handle_meeting_ws(socket, state, meeting_id, identity)))
}

#[instrument(skip(socket, state, identity))]
async fn handle_meeting_ws(
    socket: WebSocket,
    state: AppState,
    meeting_id: String,
    identity: Option<Identity>,
) {
    let hub = state.config.hub.clone();
    let (conn, queue) = Connection::new(meeting_id, hub.queue_capacity);

    if let Some(identity) = identity {
        conn.identify(identity);
        if let Err(e) = state.registry.register(conn.clone()) {
            warn!("Failed to register meeting socket: {}", e);
            return;
        }
    }

    info!(
        connection_id = %conn.id(),
        participant_id = conn.participant_id().unwrap_or("-"),
        "Meeting WebSocket connected"
    );

    let (sink, stream) = socket.split();
    Session::new(conn, state.registry.clone(), state.gateway.clone(), hub)
        .run(queue, sink, stream)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::api::routes::create_router;
    use crate::api::server::test_support::{test_config, test_state};
    use crate::hub::gateway::memory::MemoryGateway;

    fn params(meeting_id: &str) -> MeetingSocketParams {
        MeetingSocketParams {
            meeting_id: Some(meeting_id.to_string()),
            ..MeetingSocketParams::default()
        }
    }

    #[test]
    fn test_identity_requires_user_id() {
        assert!(params("abc123").identity().is_none());

        let with_user = MeetingSocketParams {
            user_id: Some(" ".to_string()),
            ..params("abc123")
        };
        assert!(with_user.identity().is_none());

        let with_user = MeetingSocketParams {
            user_id: Some("alice".to_string()),
            user_name: Some("Alice".to_string()),
            ..params("abc123")
        };
        let identity = with_user.identity().unwrap();
        assert_eq!(identity.participant_id, "alice");
        assert_eq!(identity.display_name, "Alice");
        assert_eq!(identity.contact, "");
    }

    #[tokio::test]
    async fn test_admit_checks_meeting() {
        let gateway = MemoryGateway::with_meetings(&["abc123"]);
        let wait = Duration::from_secs(5);

        let admitted = admit(&params("abc123"), None, &[], &gateway, wait).await;
        assert_eq!(admitted.unwrap(), "abc123");

        let missing = admit(&MeetingSocketParams::default(), None, &[], &gateway, wait).await;
        assert!(matches!(missing, Err(HuddleError::InvalidRequest(_))));

        let unknown = admit(&params("nope"), None, &[], &gateway, wait).await;
        assert!(matches!(unknown, Err(HuddleError::MeetingNotFound { .. })));
    }

    #[tokio::test]
    async fn test_admit_checks_origin() {
        let gateway = MemoryGateway::with_meetings(&["abc123"]);
        let allowed = vec!["https://app.example.com".to_string()];
        let wait = Duration::from_secs(5);

        let ok = admit(
            &params("abc123"),
            Some("https://app.example.com"),
            &allowed,
            &gateway,
            wait,
        )
        .await;
        assert!(ok.is_ok());

        let foreign = admit(
            &params("abc123"),
            Some("https://evil.example.com"),
            &allowed,
            &gateway,
            wait,
        )
        .await;
        assert!(matches!(foreign, Err(HuddleError::OriginNotAllowed(_))));

        let absent = admit(&params("abc123"), None, &allowed, &gateway, wait).await;
        assert!(matches!(absent, Err(HuddleError::OriginNotAllowed(_))));
    }

    struct StalledGateway;

    #[async_trait::async_trait]
    impl PersistenceGateway for StalledGateway {
        async fn meeting_exists(&self, _meeting_id: &str) -> Result<bool> {
            std::future::pending().await
        }

        async fn persist_chat(
            &self,
            _message: crate::models::NewChatMessage,
        ) -> Result<crate::models::ChatMessage> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_times_out() {
        let result = admit(
            &params("abc123"),
            None,
            &[],
            &StalledGateway,
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(HuddleError::Timeout)));
        assert_eq!(
            result.unwrap_err().status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    async fn status_for(uri: &str, origin: Option<&str>, allowed: &[&str]) -> StatusCode {
        let mut config = test_config();
        config.api.allowed_origins = allowed.iter().map(|s| s.to_string()).collect();
        let state = test_state(config, Arc::new(MemoryGateway::with_meetings(&["abc123"])));

        let mut request = Request::get(uri);
        if let Some(origin) = origin {
            request = request.header(header::ORIGIN, origin);
        }

        create_router(state)
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_upgrade_rejections_map_to_status_codes() {
        assert_eq!(status_for("/api/ws", None, &[]).await, StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for("/api/ws?meetingId=nope", None, &[]).await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(
                "/api/ws?meetingId=abc123",
                Some("https://evil.example.com"),
                &["https://app.example.com"]
            )
            .await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for("/api/ws?meetingId=abc123&userId=alice", None, &[]).await,
            StatusCode::UPGRADE_REQUIRED
        );
    }
}
