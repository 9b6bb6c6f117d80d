use std::sync::Arc;

use anyhow::Result;
use parley_server::{db, server, telemetry, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let dotenv = dotenvy::dotenv();

    // Initialize telemetry
    if std::env::var("PARLEY_LOG_FORMAT").is_ok() {
        telemetry::init().map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;
    } else {
        telemetry::init_local()
            .map_err(|e| anyhow::anyhow!("Failed to init local telemetry: {}", e))?;
    }

    info!("Parley Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    // Load configuration
    let server_config = ServerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load server configuration: {}", e))?;
    server_config.log_config();

    // Initialize database
    let db_config = match &server_config.db_path {
        Some(path) => db::DatabaseConfig::file(path),
        None => db::DatabaseConfig::default(),
    };
    let database = db::Database::open("messages", &db_config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize database: {}", e))?;

    db::MigrationRunner::messages()
        .run(&database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database initialized and migrations complete");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    return;
                }
            }
            shutdown.cancel();
        }
    });

    // Start the server
    server::start(server_config, Arc::new(database), shutdown).await?;

    telemetry::shutdown();

    Ok(())
}
