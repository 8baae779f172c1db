//! Per-connection inbound dispatch
//!
//! Runs inside the reader loop, one frame at a time. Broadcasts are issued
//! synchronously before the next frame is read, which is what gives a single
//! sender's messages their per-recipient ordering.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::connection::{Connection, EnqueueError, IdentifyOutcome, Identity};
use super::frame::{Frame, FrameKind};
use super::gateway::PersistenceGateway;
use super::registry::{BroadcastRequest, Registry};
use crate::models::NewChatMessage;

/// What the router did with one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Identity bound (or re-confirmed) and acknowledged
    Identified,
    /// Liveness pong queued
    Ponged,
    /// Chat persisted and fanned out
    ChatRelayed { delivered: usize },
    /// Chat not stored, so not relayed
    ChatDropped,
    /// Signaling fanned out
    Relayed { delivered: usize },
    /// Frame could not be parsed
    Malformed,
    /// Frame parsed but not acted on
    Ignored,
}

pub struct MessageRouter {
    conn: Arc<Connection>,
    registry: Arc<Registry>,
    gateway: Arc<dyn PersistenceGateway>,
    persist_timeout: Duration,
}

impl MessageRouter {
    pub fn new(
        conn: Arc<Connection>,
        registry: Arc<Registry>,
        gateway: Arc<dyn PersistenceGateway>,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            conn,
            registry,
            gateway,
            persist_timeout,
        }
    }

    /// Handle one text frame. Never fails: a bad frame is logged and dropped.
    pub async fn dispatch(&self, text: &str) -> RouteOutcome {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    connection_id = %self.conn.id(),
                    meeting_id = %self.conn.meeting_id(),
                    "Dropping malformed frame: {}",
                    e
                );
                return RouteOutcome::Malformed;
            }
        };

        let kind = frame.classify();
        if kind == FrameKind::Auth {
            return self.handle_auth(frame);
        }

        let Some(identity) = self.conn.identity() else {
            debug!(
                connection_id = %self.conn.id(),
                kind = %frame.kind,
                "Ignoring frame from unidentified connection"
            );
            return RouteOutcome::Ignored;
        };

        match kind {
            FrameKind::Ping => self.handle_ping(),
            FrameKind::Chat => self.handle_chat(&identity, frame).await,
            FrameKind::Signaling => self.handle_signaling(&identity, frame),
            FrameKind::Auth | FrameKind::Unrecognized => {
                debug!(
                    meeting_id = %self.conn.meeting_id(),
                    participant_id = %identity.participant_id,
                    kind = %frame.kind,
                    "Ignoring unrecognized frame"
                );
                RouteOutcome::Ignored
            }
        }
    }

    fn handle_auth(&self, frame: Frame) -> RouteOutcome {
        let participant_id = frame.user_id.trim();
        if participant_id.is_empty() {
            warn!(connection_id = %self.conn.id(), "Auth frame without userId");
            return RouteOutcome::Ignored;
        }
        if !frame.meeting_id.is_empty() && frame.meeting_id != self.conn.meeting_id() {
            warn!(
                connection_id = %self.conn.id(),
                meeting_id = %self.conn.meeting_id(),
                requested = %frame.meeting_id,
                "Auth frame names a different meeting"
            );
            return RouteOutcome::Ignored;
        }

        let identity = Identity::new(participant_id, frame.user_name, frame.user_email);
        match self.conn.identify(identity) {
            IdentifyOutcome::Bound => {
                if let Err(e) = self.registry.register(self.conn.clone()) {
                    warn!(connection_id = %self.conn.id(), "Registration failed: {}", e);
                    return RouteOutcome::Ignored;
                }
                info!(
                    meeting_id = %self.conn.meeting_id(),
                    participant_id = %participant_id,
                    "Participant authenticated"
                );
            }
            IdentifyOutcome::AlreadyBound => {
                debug!(participant_id = %participant_id, "Repeated auth frame; profile refreshed");
            }
            IdentifyOutcome::Conflict => {
                warn!(
                    connection_id = %self.conn.id(),
                    bound = self.conn.participant_id().unwrap_or("-"),
                    presented = %participant_id,
                    "Ignoring auth frame for a different participant"
                );
                return RouteOutcome::Ignored;
            }
        }

        match self.conn.identity() {
            Some(identity) => {
                self.reply(Frame::auth_success(&identity, self.conn.meeting_id()));
                RouteOutcome::Identified
            }
            None => RouteOutcome::Ignored,
        }
    }

    fn handle_ping(&self) -> RouteOutcome {
        self.reply(Frame::pong());
        RouteOutcome::Ponged
    }

    async fn handle_chat(&self, identity: &Identity, frame: Frame) -> RouteOutcome {
        let text = match frame.text().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => return RouteOutcome::Ignored,
        };

        let message = NewChatMessage {
            meeting_id: self.conn.meeting_id().to_string(),
            user_id: identity.participant_id.clone(),
            user_name: identity.display_name.clone(),
            user_email: identity.contact.clone(),
            message: text,
            timestamp: Utc::now(),
        };

        let stored = match timeout(self.persist_timeout, self.gateway.persist_chat(message)).await {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) => {
                warn!(
                    meeting_id = %self.conn.meeting_id(),
                    participant_id = %identity.participant_id,
                    "Failed to save chat message: {}",
                    e
                );
                return RouteOutcome::ChatDropped;
            }
            Err(_) => {
                warn!(
                    meeting_id = %self.conn.meeting_id(),
                    participant_id = %identity.participant_id,
                    timeout_ms = self.persist_timeout.as_millis() as u64,
                    "Timed out saving chat message"
                );
                return RouteOutcome::ChatDropped;
            }
        };

        match Frame::chat(&stored).encode() {
            Ok(payload) => RouteOutcome::ChatRelayed {
                delivered: self.fan_out(identity, payload, &frame.kind),
            },
            Err(e) => {
                warn!("Failed to encode chat frame: {}", e);
                RouteOutcome::ChatDropped
            }
        }
    }

    fn handle_signaling(&self, identity: &Identity, mut frame: Frame) -> RouteOutcome {
        frame.stamp_sender(identity, self.conn.meeting_id());

        match frame.encode() {
            Ok(payload) => RouteOutcome::Relayed {
                delivered: self.fan_out(identity, payload, &frame.kind),
            },
            Err(e) => {
                warn!("Failed to encode signaling frame: {}", e);
                RouteOutcome::Ignored
            }
        }
    }

    fn fan_out(&self, identity: &Identity, payload: String, kind: &str) -> usize {
        let request = BroadcastRequest::new(
            self.conn.meeting_id(),
            payload,
            Some(identity.participant_id.clone()),
            kind,
        );
        self.registry.broadcast(&request).delivered
    }

    /// Queue a frame for this connection only
    fn reply(&self, frame: Frame) {
        let payload = match frame.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode reply: {}", e);
                return;
            }
        };

        match self.conn.try_enqueue(payload) {
            Ok(()) => {}
            Err(EnqueueError::Full) => {
                warn!(
                    connection_id = %self.conn.id(),
                    meeting_id = %self.conn.meeting_id(),
                    "Own outbound queue full, closing connection"
                );
                self.registry.unregister(&self.conn);
            }
            Err(EnqueueError::Closed) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::connection::OutboundQueue;
    use crate::hub::gateway::memory::MemoryGateway;
    use serde_json::Value;

    struct Harness {
        registry: Arc<Registry>,
        gateway: Arc<MemoryGateway>,
    }

    impl Harness {
        fn new(gateway: MemoryGateway) -> Self {
            Self {
                registry: Arc::new(Registry::new()),
                gateway: Arc::new(gateway),
            }
        }

        fn connect(&self, meeting: &str) -> (MessageRouter, Arc<Connection>, OutboundQueue) {
            let (conn, rx) = Connection::new(meeting, 256);
            let router = MessageRouter::new(
                conn.clone(),
                self.registry.clone(),
                self.gateway.clone(),
                Duration::from_secs(5),
            );
            (router, conn, rx)
        }

        async fn join(&self, meeting: &str, user: &str) -> (MessageRouter, Arc<Connection>, OutboundQueue) {
            let (router, conn, mut rx) = self.connect(meeting);
            let auth = format!(
                r#"{{"type":"auth","userId":"{user}","userName":"{user} name","userEmail":"{user}@example.com"}}"#
            );
            assert_eq!(router.dispatch(&auth).await, RouteOutcome::Identified);
            let ack: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(ack["type"], "auth-success");
            (router, conn, rx)
        }
    }

    fn next_json(rx: &mut OutboundQueue) -> Option<Value> {
        rx.try_recv().ok().map(|s| serde_json::from_str(&s).unwrap())
    }

    #[tokio::test]
    async fn test_auth_registers_and_acknowledges() {
        let h = Harness::new(MemoryGateway::with_meetings(&["abc123"]));
        let (_router, conn, _rx) = h.join("abc123", "alice").await;

        assert_eq!(conn.participant_id(), Some("alice"));
        assert_eq!(h.registry.participants("abc123"), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_auth_after_upgrade_identity_fills_in_profile() {
        let h = Harness::new(MemoryGateway::with_meetings(&["abc123"]));
        let (_b_router, _b, mut b_rx) = h.join("abc123", "bob").await;

        let (router, conn, mut rx) = h.connect("abc123");
        conn.identify(Identity::new("alice", "", ""));
        h.registry.register(conn.clone()).unwrap();

        let outcome = router
            .dispatch(r#"{"type":"auth","userId":"alice","userName":"Alice","userEmail":"alice@example.com"}"#)
            .await;
        assert_eq!(outcome, RouteOutcome::Identified);
        let ack = next_json(&mut rx).unwrap();
        assert_eq!(ack["type"], "auth-success");
        assert_eq!(ack["userName"], "Alice");

        router.dispatch(r#"{"type":"chat","data":"hi"}"#).await;

        let saved = h.gateway.saved();
        assert_eq!(saved[0].user_name, "Alice");
        assert_eq!(saved[0].user_email, "alice@example.com");
        let relayed = next_json(&mut b_rx).unwrap();
        assert_eq!(relayed["userName"], "Alice");
    }

    #[tokio::test]
    async fn test_auth_for_other_participant_is_ignored() {
        let h = Harness::new(MemoryGateway::default());
        let (router, conn, mut rx) = h.join("abc123", "alice").await;

        let outcome = router
            .dispatch(r#"{"type":"auth","userId":"mallory"}"#)
            .await;
        assert_eq!(outcome, RouteOutcome::Ignored);
        assert_eq!(conn.participant_id(), Some("alice"));
        assert!(next_json(&mut rx).is_none());
    }

    #[tokio::test]
    async fn test_auth_for_other_meeting_is_ignored() {
        let h = Harness::new(MemoryGateway::default());
        let (router, conn, _rx) = h.connect("abc123");

        let outcome = router
            .dispatch(r#"{"type":"auth","userId":"alice","meetingId":"elsewhere"}"#)
            .await;
        assert_eq!(outcome, RouteOutcome::Ignored);
        assert!(conn.identity().is_none());
        assert_eq!(h.registry.meeting_count(), 0);
    }

    #[tokio::test]
    async fn test_frames_before_identify_are_ignored() {
        let h = Harness::new(MemoryGateway::with_meetings(&["abc123"]));
        let (_b_router, _b, mut b_rx) = h.join("abc123", "bob").await;
        let (router, _conn, mut rx) = h.connect("abc123");

        assert_eq!(router.dispatch(r#"{"type":"ping"}"#).await, RouteOutcome::Ignored);
        assert_eq!(
            router.dispatch(r#"{"type":"chat","data":"hi"}"#).await,
            RouteOutcome::Ignored
        );
        assert_eq!(
            router.dispatch(r#"{"type":"offer","sdp":"x"}"#).await,
            RouteOutcome::Ignored
        );

        assert!(next_json(&mut rx).is_none());
        assert!(next_json(&mut b_rx).is_none());
        assert!(h.gateway.saved().is_empty());
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let h = Harness::new(MemoryGateway::default());
        let (router, _conn, mut rx) = h.join("abc123", "alice").await;

        assert_eq!(router.dispatch(r#"{"type":"ping"}"#).await, RouteOutcome::Ponged);
        assert_eq!(next_json(&mut rx).unwrap()["type"], "pong");
    }

    #[tokio::test]
    async fn test_chat_is_persisted_and_relayed_to_others() {
        let h = Harness::new(MemoryGateway::with_meetings(&["abc123"]));
        let (a_router, _a, mut a_rx) = h.join("abc123", "alice").await;
        let (_b_router, _b, mut b_rx) = h.join("abc123", "bob").await;

        let outcome = a_router
            .dispatch(r#"{"type":"chat","data":"  hello  ","userId":"spoofed"}"#)
            .await;
        assert_eq!(outcome, RouteOutcome::ChatRelayed { delivered: 1 });

        let saved = h.gateway.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].meeting_id, "abc123");
        assert_eq!(saved[0].user_id, "alice");
        assert_eq!(saved[0].message, "hello");

        let relayed = next_json(&mut b_rx).unwrap();
        assert_eq!(relayed["type"], "chat");
        assert_eq!(relayed["data"], "hello");
        assert_eq!(relayed["userId"], "alice");
        assert_eq!(relayed["userName"], "alice name");
        assert_eq!(relayed["id"], saved[0].id.to_string());

        assert!(next_json(&mut a_rx).is_none());
    }

    #[tokio::test]
    async fn test_blank_or_non_text_chat_is_ignored() {
        let h = Harness::new(MemoryGateway::default());
        let (router, _conn, _rx) = h.join("abc123", "alice").await;

        assert_eq!(
            router.dispatch(r#"{"type":"chat","data":"   "}"#).await,
            RouteOutcome::Ignored
        );
        assert_eq!(
            router.dispatch(r#"{"type":"chat","data":{"text":"hi"}}"#).await,
            RouteOutcome::Ignored
        );
        assert!(h.gateway.saved().is_empty());
    }

    #[tokio::test]
    async fn test_chat_dropped_when_persistence_fails() {
        let h = Harness::new(MemoryGateway::default().failing());
        let (a_router, _a, _a_rx) = h.join("abc123", "alice").await;
        let (_b_router, _b, mut b_rx) = h.join("abc123", "bob").await;

        assert_eq!(
            a_router.dispatch(r#"{"type":"chat","data":"hello"}"#).await,
            RouteOutcome::ChatDropped
        );
        assert!(next_json(&mut b_rx).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_dropped_when_persistence_times_out() {
        let h = Harness::new(MemoryGateway::default().slow(Duration::from_secs(30)));
        let (a_router, _a, _a_rx) = h.join("abc123", "alice").await;
        let (_b_router, _b, mut b_rx) = h.join("abc123", "bob").await;

        assert_eq!(
            a_router.dispatch(r#"{"type":"chat","data":"hello"}"#).await,
            RouteOutcome::ChatDropped
        );
        assert!(next_json(&mut b_rx).is_none());
    }

    #[tokio::test]
    async fn test_signaling_relayed_with_bound_identity() {
        let h = Harness::new(MemoryGateway::default());
        let (a_router, _a, mut a_rx) = h.join("abc123", "alice").await;
        let (_b_router, _b, mut b_rx) = h.join("abc123", "bob").await;

        let outcome = a_router
            .dispatch(r#"{"type":"ice-candidate","candidate":{"candidate":"c1"},"userId":"bob"}"#)
            .await;
        assert_eq!(outcome, RouteOutcome::Relayed { delivered: 1 });

        let relayed = next_json(&mut b_rx).unwrap();
        assert_eq!(relayed["type"], "ice-candidate");
        assert_eq!(relayed["candidate"]["candidate"], "c1");
        assert_eq!(relayed["userId"], "alice");
        assert!(next_json(&mut a_rx).is_none());
        assert!(h.gateway.saved().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_are_dropped() {
        let h = Harness::new(MemoryGateway::default());
        let (router, conn, mut rx) = h.join("abc123", "alice").await;

        assert_eq!(router.dispatch("{not json").await, RouteOutcome::Malformed);
        assert_eq!(
            router.dispatch(r#"{"type":"dance"}"#).await,
            RouteOutcome::Ignored
        );
        assert!(conn.is_live());
        assert!(next_json(&mut rx).is_none());
    }

    #[tokio::test]
    async fn test_sender_order_preserved_per_recipient() {
        let h = Harness::new(MemoryGateway::default());
        let (a_router, _a, _a_rx) = h.join("abc123", "alice").await;
        let (_b_router, _b, mut b_rx) = h.join("abc123", "bob").await;

        for i in 0..10 {
            a_router
                .dispatch(&format!(r#"{{"type":"chat","data":"m{}"}}"#, i))
                .await;
        }

        for i in 0..10 {
            assert_eq!(next_json(&mut b_rx).unwrap()["data"], format!("m{}", i));
        }
    }
}
