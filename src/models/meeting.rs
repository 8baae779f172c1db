use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Length of a generated public meeting id
pub const MEETING_ID_LEN: usize = 10;

const MEETING_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A named session grouping participants for chat and signaling relay
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Meeting {
    pub id: Uuid,
    pub meeting_id: String,
    pub title: String,
    pub created_by: String,
    pub participants: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Meeting {
    /// Build a fresh active meeting with a generated public id
    pub fn new(title: impl Into<String>, created_by: impl Into<String>) -> Self {
        let created_by = created_by.into();
        Self {
            id: Uuid::new_v4(),
            meeting_id: generate_meeting_id(),
            title: title.into(),
            participants: vec![created_by.clone()],
            created_by,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

/// Request to create a meeting
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMeetingRequest {
    #[serde(default)]
    pub title: String,
    pub created_by: String,
}

/// Request to join a meeting
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMeetingRequest {
    pub meeting_id: String,
    pub user_id: String,
}

/// Generate a random lowercase alphanumeric meeting id
pub fn generate_meeting_id() -> String {
    let mut rng = rand::thread_rng();
    (0..MEETING_ID_LEN)
        .map(|_| MEETING_ID_ALPHABET[rng.gen_range(0..MEETING_ID_ALPHABET.len())] as char)
        .collect()
}
