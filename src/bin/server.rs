//! lobby-server - room store daemon with change feed and health endpoint

use anyhow::{Context, Result};
use clap::Parser;
use lobby::config::Config;
use lobby::server::{health, HealthStatus, ServerListener};
use lobby::store::{LocalStore, StoreError};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

#[derive(Parser)]
#[command(name = "lobby-server")]
#[command(about = "Room store server for the lobby")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Socket path override
    #[arg(long)]
    socket: Option<std::path::PathBuf>,

    /// Health endpoint address override
    #[arg(long)]
    health_addr: Option<String>,

    /// Extra room to provision at startup (repeatable)
    #[arg(long = "room")]
    rooms: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let socket_path = cli.socket.unwrap_or_else(|| config.socket_path());
    let health_addr = cli
        .health_addr
        .unwrap_or_else(|| config.server.health_addr.clone());

    tracing::info!("Starting lobby server, keys: {:?}", config.keys);

    let store = LocalStore::new();
    for room_id in config.server.seed_rooms.iter().chain(cli.rooms.iter()) {
        match store.create_room(room_id).await {
            Ok(_) | Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => tracing::warn!("Skipping seed room '{}': {}", room_id, e),
        }
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let health_listener = TcpListener::bind(&health_addr)
        .await
        .with_context(|| format!("Failed to bind health endpoint on {}", health_addr))?;
    let status = HealthStatus::from_keys(&config.keys);
    let mut health_stop = stop_rx;
    let health_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = health_stop.changed().await;
        };
        if let Err(e) = health::serve(health_listener, status, shutdown).await {
            tracing::error!("Health endpoint failed: {}", e);
        }
    });

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    let server = ServerListener::new(socket_path, store, config.keys.clone());
    let result = server.run(shutdown_rx).await;

    let _ = stop_tx.send(true);
    let _ = health_handle.await;

    result
}
