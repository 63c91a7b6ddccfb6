//! Backup Server
//!
//! Encrypted multi-client file backup server with a JSON status endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backup_server::config::Config;
use backup_server::crypto::RsaAesCrypto;
use backup_server::db;
use backup_server::maintenance::{MaintenanceLoop, MaintenanceSettings};
use backup_server::protocol::Dispatcher;
use backup_server::routes;
use backup_server::routes::status::StatusBoard;
use backup_server::server::{self, ServerLimits};
use backup_server::session::SessionRegistry;
use backup_server::state::AppState;
use backup_server::storage::{FileVault, Persistence, SqlitePersistence};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "backup_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Backup Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Backup directory: {}", config.storage.backup_dir.display());

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.url))?;
    tracing::info!("Database initialized at {}", config.database.url);

    let persistence = Arc::new(SqlitePersistence::new(db_pool));

    // Restore known clients; a broken store must stop startup
    let registry = SessionRegistry::new();
    let records = persistence
        .load_all_sessions()
        .await
        .context("Failed to load stored sessions")?;
    let restored = registry.restore(&records);
    tracing::info!("Restored {} of {} stored sessions", restored, records.len());

    // Background maintenance
    let status_board = StatusBoard::new();
    let maintenance = MaintenanceLoop::new(
        registry.clone(),
        Arc::new(status_board.clone()),
        MaintenanceSettings::from(&config.maintenance),
    )
    .start();

    let dispatcher = Dispatcher::new(
        registry.clone(),
        Arc::new(RsaAesCrypto::new()),
        persistence,
        FileVault::new(&config.storage.backup_dir),
        config.limits.transfer_limits(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Status endpoint
    let status_server = if config.status.enabled {
        let app = routes::router(AppState::new(config.clone(), registry.clone(), status_board));
        let addr = SocketAddr::from(([0, 0, 0, 0], config.status.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind status endpoint on {}", addr))?;
        tracing::info!("Status endpoint listening on {}", addr);

        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!("Status endpoint failed: {}", e);
            }
        }))
    } else {
        None
    };

    // Backup protocol
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Backup Server listening on {}", addr);

    let limits = ServerLimits {
        max_payload_bytes: config.server.max_payload_bytes,
    };
    server::run(listener, dispatcher, limits, shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    maintenance.abort();
    if let Some(handle) = status_server {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
