use crate::error::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    for (version, name, sql) in get_migrations() {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            // Plain string execute uses the simple protocol, which allows multiple statements
            pool.execute(sql).await?;
            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let result = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(result > 0)
}

/// Record a migration as applied
async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "meetings_table", MIGRATION_001_MEETINGS),
        (2, "chat_messages_table", MIGRATION_002_CHAT_MESSAGES),
    ]
}

// Migration 1: Meetings
const MIGRATION_001_MEETINGS: &str = r#"
CREATE TABLE IF NOT EXISTS meetings (
    id UUID PRIMARY KEY,
    meeting_id VARCHAR(64) NOT NULL,
    title VARCHAR(255) NOT NULL DEFAULT '',
    created_by VARCHAR(255) NOT NULL,
    participants TEXT[] NOT NULL DEFAULT '{}',
    is_active BOOLEAN NOT NULL DEFAULT true,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT unique_meeting_id UNIQUE (meeting_id)
);

CREATE INDEX IF NOT EXISTS idx_meetings_active ON meetings(is_active);
"#;

// Migration 2: Chat history
const MIGRATION_002_CHAT_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS chat_messages (
    id UUID PRIMARY KEY,
    meeting_id VARCHAR(64) NOT NULL,
    user_id VARCHAR(255) NOT NULL,
    user_name VARCHAR(255) NOT NULL DEFAULT '',
    user_email VARCHAR(255) NOT NULL DEFAULT '',
    message TEXT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Replay reads one meeting in timestamp order
CREATE INDEX IF NOT EXISTS idx_chat_messages_meeting_ts ON chat_messages(meeting_id, timestamp ASC);
"#;
