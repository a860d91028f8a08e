use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use tempo_core::events::ChangeEvent;
use tempo_engine::Engine;
use tempo_server::HandlerState;
use tempo_store::Database;
use tempo_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() {
    let telemetry = Arc::new(init_telemetry(TelemetryConfig::default()));

    tracing::info!("Starting Tempo server");

    // Database path
    let data_dir = dirs_home().join(".tempo").join("database");
    std::fs::create_dir_all(&data_dir).expect("Failed to create database directory");
    let db_path = data_dir.join("tempo.db");

    let db = Database::open(&db_path).expect("Failed to open database");
    tracing::info!(path = %db_path.display(), "Database opened");

    // Change-event broadcast channel
    let (event_tx, _) = broadcast::channel::<ChangeEvent>(1024);

    let engine = Engine::new(db, event_tx.clone());
    let handler_state = HandlerState::with_telemetry(engine, telemetry);

    // Start server
    let config = tempo_server::ServerConfig::default();
    let port = config.port;
    let _handle = tempo_server::start(config, handler_state, event_tx)
        .await
        .expect("Failed to start server");

    tracing::info!(port = port, "Tempo server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
