use crate::error::Result;
use crate::models::{ChatMessage, NewChatMessage};
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for chat history
#[derive(Clone)]
pub struct ChatRepository {
    pool: PgPool,
}

impl ChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store a chat message, assigning its id
    pub async fn create(&self, msg: NewChatMessage) -> Result<ChatMessage> {
        let stored = sqlx::query_as::<_, ChatMessage>(
            r#"
            INSERT INTO chat_messages (id, meeting_id, user_id, user_name, user_email, message, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, meeting_id, user_id, user_name, user_email, message, timestamp
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&msg.meeting_id)
        .bind(&msg.user_id)
        .bind(&msg.user_name)
        .bind(&msg.user_email)
        .bind(&msg.message)
        .bind(msg.timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    /// List a meeting's messages, oldest first
    pub async fn list_for_meeting(&self, meeting_id: &str) -> Result<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, meeting_id, user_id, user_name, user_email, message, timestamp
            FROM chat_messages
            WHERE meeting_id = $1
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(meeting_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }
}
