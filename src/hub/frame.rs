//! Wire frames exchanged over a meeting socket
//!
//! Frames are JSON text messages with camelCase fields. Fields the hub does
//! not know about (`sdp`, `candidate`, ...) are carried through untouched so
//! signaling relays stay opaque.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::connection::Identity;
use crate::models::ChatMessage;

pub const KIND_AUTH: &str = "auth";
pub const KIND_AUTH_SUCCESS: &str = "auth-success";
pub const KIND_PING: &str = "ping";
pub const KIND_PONG: &str = "pong";
pub const KIND_CHAT: &str = "chat";

/// Relay-only kinds; never persisted
pub const SIGNALING_KINDS: &[&str] = &[
    "signaling",
    "offer",
    "answer",
    "ice-candidate",
    "user-joined",
    "user-left",
    "participant-joined",
    "participant-left",
];

/// Routing class of an inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Auth,
    Ping,
    Chat,
    Signaling,
    Unrecognized,
}

impl FrameKind {
    pub fn classify(kind: &str) -> Self {
        match kind {
            KIND_AUTH => Self::Auth,
            KIND_PING => Self::Ping,
            KIND_CHAT => Self::Chat,
            k if SIGNALING_KINDS.contains(&k) => Self::Signaling,
            _ => Self::Unrecognized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Ping => "ping",
            Self::Chat => "chat",
            Self::Signaling => "signaling",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single socket frame, inbound or outbound
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "String::is_empty")]
    pub user_name: String,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "String::is_empty")]
    pub user_email: String,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "String::is_empty")]
    pub meeting_id: String,
    #[serde(default, deserialize_with = "timestamp_text", skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Browsers send either an RFC 3339 string or epoch milliseconds
fn timestamp_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "invalid timestamp: {}",
            other
        ))),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Frame {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn classify(&self) -> FrameKind {
        FrameKind::classify(&self.kind)
    }

    /// Chat text carried in `data`, if it is a string
    pub fn text(&self) -> Option<&str> {
        self.data.as_str()
    }

    /// Acknowledges a successful identify
    pub fn auth_success(identity: &Identity, meeting_id: &str) -> Self {
        Self {
            kind: KIND_AUTH_SUCCESS.to_string(),
            user_id: identity.participant_id.clone(),
            user_name: identity.display_name.clone(),
            meeting_id: meeting_id.to_string(),
            timestamp: now_rfc3339(),
            ..Self::default()
        }
    }

    pub fn pong() -> Self {
        Self {
            kind: KIND_PONG.to_string(),
            timestamp: now_rfc3339(),
            ..Self::default()
        }
    }

    /// Relay form of a persisted chat message
    pub fn chat(message: &ChatMessage) -> Self {
        Self {
            kind: KIND_CHAT.to_string(),
            data: Value::String(message.message.clone()),
            user_id: message.user_id.clone(),
            user_name: message.user_name.clone(),
            user_email: message.user_email.clone(),
            meeting_id: message.meeting_id.clone(),
            // Same rendering as the stored row in chat history
            timestamp: message
                .timestamp
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            id: Some(message.id.to_string()),
            extra: Map::new(),
        }
    }

    /// Replace client-supplied sender fields with the bound identity
    pub fn stamp_sender(&mut self, identity: &Identity, meeting_id: &str) {
        self.user_id = identity.participant_id.clone();
        self.user_name = identity.display_name.clone();
        self.user_email = identity.contact.clone();
        self.meeting_id = meeting_id.to_string();
        if self.timestamp.is_empty() {
            self.timestamp = now_rfc3339();
        }
    }
}
