use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A persisted chat message; immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: Uuid,
    pub meeting_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A chat message awaiting a server-assigned id
#[derive(Debug, Clone, PartialEq)]
pub struct NewChatMessage {
    pub meeting_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl NewChatMessage {
    pub fn assign_id(self, id: Uuid) -> ChatMessage {
        ChatMessage {
            id,
            meeting_id: self.meeting_id,
            user_id: self.user_id,
            user_name: self.user_name,
            user_email: self.user_email,
            message: self.message,
            timestamp: self.timestamp,
        }
    }
}

/// Chat history response
#[derive(Debug, Clone, Serialize)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
    pub count: usize,
}

impl From<Vec<ChatMessage>> for ChatHistory {
    fn from(messages: Vec<ChatMessage>) -> Self {
        let count = messages.len();
        Self { messages, count }
    }
}
