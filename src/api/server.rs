//! API server using Axum

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::Config;
use crate::database::Database;
use crate::error::{HuddleError, Result};
use crate::hub::{PersistenceGateway, Registry};

use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub registry: Arc<Registry>,
    pub gateway: Arc<dyn PersistenceGateway>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        db: Database,
        config: Config,
        registry: Arc<Registry>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self {
            db,
            config,
            registry,
            gateway,
            started_at: Instant::now(),
        }
    }
}

/// API server
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        let timeout = Duration::from_secs(self.state.config.api.request_timeout);

        routes::create_router(self.state.clone())
            .layer(TimeoutLayer::new(timeout))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until the shutdown flag flips to `true`
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self.state.config.api_addr().parse().map_err(|_| {
            HuddleError::InvalidConfig(format!(
                "Invalid API server address: {}",
                self.state.config.api_addr()
            ))
        })?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| HuddleError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{ApiServerConfig, DatabaseConfig, HubConfig, LogConfig};

    pub fn test_config() -> Config {
        Config {
            api: ApiServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                allowed_origins: Vec::new(),
                request_timeout: 30,
            },
            database: DatabaseConfig {
                host: "127.0.0.1".to_string(),
                port: 1,
                user: "huddle".to_string(),
                password: "huddle".to_string(),
                name: "huddle".to_string(),
                ssl_mode: "disable".to_string(),
                max_connections: 1,
                min_connections: 0,
            },
            hub: HubConfig::default(),
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    /// State whose database pool never connects unless a handler queries it
    pub fn test_state(config: Config, gateway: Arc<dyn PersistenceGateway>) -> AppState {
        let db = Database::connect_lazy(&config).expect("lazy pool");

        AppState::new(
            db,
            config,
            Arc::new(Registry::new()),
            gateway,
        )
    }
}
