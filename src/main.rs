//! Huddle Server - Entry Point
//!
//! Starts the API server and the connection sweep with graceful shutdown.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use huddle::api::{ApiServer, AppState};
use huddle::config::{Config, LogConfig};
use huddle::database::Database;
use huddle::hub::{PersistenceGateway, PgGateway, Registry};
use huddle::services::{ConnectionSweepHandle, ConnectionSweepService};

#[tokio::main]
async fn main() -> huddle::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.log);
    info!("Starting Huddle server");

    // Connect to database
    let db = Database::connect(&config).await?;
    match db.ping().await {
        Ok(latency) => info!("Connected to database ({:?})", latency),
        Err(e) => error!("Database health check failed: {}", e),
    }

    // Run migrations
    db.migrate().await?;
    info!("Database migrations complete");

    let registry = Arc::new(Registry::new());
    let gateway: Arc<dyn PersistenceGateway> = Arc::new(PgGateway::new(&db));

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start connection sweep
    let (sweep_handle, sweep_shutdown) = ConnectionSweepHandle::new();
    let sweep_service = ConnectionSweepService::new(registry.clone(), config.hub.sweep_interval);
    let sweep_task = tokio::spawn(async move {
        sweep_service.run(sweep_shutdown).await;
    });

    // Start API server
    let api_server = ApiServer::new(AppState::new(
        db.clone(),
        config.clone(),
        registry.clone(),
        gateway,
    ));
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("Server started - API: {}", config.api_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    sweep_handle.shutdown();

    // Open sockets hold graceful shutdown until they close
    let closed = registry.close_all();
    info!("Closed {} meeting connections", closed);

    let _ = tokio::join!(api_task, sweep_task);

    db.close().await;
    info!("Huddle server stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("huddle={},tower_http=debug", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
