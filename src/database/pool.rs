use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::config::{Config, DatabaseConfig};
use crate::error::{HuddleError, Result};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const MAX_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Shared handle to the chat store's Postgres pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Pool sizing as reported by `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
}

fn pool_options(db: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .min_connections(db.min_connections.min(db.max_connections))
        .max_connections(db.max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(MAX_LIFETIME)
}

impl Database {
    /// Open the pool and wait for the first connection
    #[instrument(skip_all, fields(host = %config.database.host, db = %config.database.name))]
    pub async fn connect(config: &Config) -> Result<Self> {
        info!("Connecting to chat store");

        let pool = pool_options(&config.database)
            .connect(&config.database_url())
            .await
            .map_err(|e| HuddleError::DatabaseConnection(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Pool that dials on first use; nothing touches the network here
    pub fn connect_lazy(config: &Config) -> Result<Self> {
        let pool = pool_options(&config.database)
            .connect_lazy(&config.database_url())
            .map_err(|e| HuddleError::DatabaseConnection(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip latency of a trivial query
    pub async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(start.elapsed())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
        }
    }

    /// Bring the chat_messages schema up to date
    #[instrument(skip_all)]
    pub async fn migrate(&self) -> Result<()> {
        super::migrations::run_migrations(&self.pool).await
    }

    pub async fn close(&self) {
        info!("Closing chat store pool");
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::server::test_support::test_config;

    #[test]
    fn test_pool_options_clamp_sizes() {
        let mut config = test_config();
        config.database.max_connections = 0;
        config.database.min_connections = 4;

        let options = pool_options(&config.database);
        assert_eq!(options.get_max_connections(), 1);
        assert_eq!(options.get_min_connections(), 0);
        assert_eq!(options.get_acquire_timeout(), ACQUIRE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_lazy_pool_starts_empty() {
        let db = Database::connect_lazy(&test_config()).unwrap();

        let stats = db.stats();
        assert_eq!(stats, PoolStats { size: 0, idle: 0 });
        assert_eq!(
            serde_json::to_value(stats).unwrap(),
            serde_json::json!({ "size": 0, "idle": 0 })
        );
    }
}
