//! Dataservice - Entry Point
//!
//! Persistence edge of the pipeline: accepts finished collection graphs
//! over HTTP and upserts them into the document store.

use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::Environment;
use mongodb::Client;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

mod api;
mod config;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    install_color_eyre();

    let environment = Environment::from_env();
    init_tracing(&environment);

    let config = Config::from_env().map_err(|e| eyre::eyre!("configuration: {}", e))?;
    info!(port = config.server.port(), "Starting dataservice");

    let client = Client::with_uri_str(&config.mongo.uri)
        .await
        .map_err(|e| eyre::eyre!("MongoDB connection failed: {}", e))?;

    // Verify connectivity before serving traffic.
    client
        .database(&config.mongo.db_name)
        .run_command(mongodb::bson::doc! { "ping": 1 })
        .await
        .map_err(|e| eyre::eyre!("MongoDB ping failed: {}", e))?;
    info!(db = %config.mongo.db_name, "Connected to MongoDB");

    let state = AppState::new(&client, &config);
    let app = api::routes(state);

    let listener = TcpListener::bind(config.server.socket_addr())
        .await
        .map_err(|e| eyre::eyre!("failed to bind {}: {}", config.server.address(), e))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| eyre::eyre!("server error: {}", e))?;

    info!("Dataservice shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
