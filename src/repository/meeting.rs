use crate::error::Result;
use crate::models::Meeting;
use sqlx::PgPool;
use tracing::info;

/// Repository for meeting database operations
#[derive(Clone)]
pub struct MeetingRepository {
    pool: PgPool,
}

impl MeetingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new meeting
    pub async fn create(&self, meeting: &Meeting) -> Result<Meeting> {
        let created = sqlx::query_as::<_, Meeting>(
            r#"
            INSERT INTO meetings (id, meeting_id, title, created_by, participants, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, meeting_id, title, created_by, participants, is_active, created_at
            "#,
        )
        .bind(meeting.id)
        .bind(&meeting.meeting_id)
        .bind(&meeting.title)
        .bind(&meeting.created_by)
        .bind(&meeting.participants)
        .bind(meeting.is_active)
        .bind(meeting.created_at)
        .fetch_one(&self.pool)
        .await?;

        info!(meeting_id = %created.meeting_id, "Meeting created");
        Ok(created)
    }

    /// Get a meeting by its public id
    pub async fn get_by_meeting_id(&self, meeting_id: &str) -> Result<Option<Meeting>> {
        let meeting = sqlx::query_as::<_, Meeting>(
            r#"
            SELECT id, meeting_id, title, created_by, participants, is_active, created_at
            FROM meetings
            WHERE meeting_id = $1
            "#,
        )
        .bind(meeting_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(meeting)
    }

    /// Check whether an active meeting exists
    pub async fn exists_active(&self, meeting_id: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM meetings WHERE meeting_id = $1 AND is_active)",
        )
        .bind(meeting_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Append a participant to the durable participant list if absent
    pub async fn add_participant(&self, meeting_id: &str, user_id: &str) -> Result<Option<Meeting>> {
        let meeting = sqlx::query_as::<_, Meeting>(
            r#"
            UPDATE meetings
            SET participants = CASE
                WHEN $2 = ANY(participants) THEN participants
                ELSE array_append(participants, $2)
            END
            WHERE meeting_id = $1
            RETURNING id, meeting_id, title, created_by, participants, is_active, created_at
            "#,
        )
        .bind(meeting_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(meeting)
    }
}
