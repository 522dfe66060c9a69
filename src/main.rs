//! lobby - enter a game room and wait for the host to start

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lobby::client::{self, RoomExit};
use lobby::config::Config;
use std::sync::Mutex;

#[derive(Parser)]
#[command(name = "lobby")]
#[command(about = "Join a board-game room and see who else is in it")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enter a room (default)
    Enter {
        /// Room code
        room: Option<String>,

        /// Username; defaults to the remembered one
        #[arg(short, long)]
        username: Option<String>,
    },
    /// List rooms on the server
    Rooms,
    /// Create an empty room (needs the service key)
    Create {
        /// Room code
        room: String,
    },
    /// Show the remembered username
    Whoami,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // The terminal belongs to the room view, so logs go to a file
    let log_path = config.client_log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();

    match cli.command {
        Some(Commands::Enter { room, username }) => enter(&config, username, room).await,
        Some(Commands::Rooms) => client::list_rooms(&config).await,
        Some(Commands::Create { room }) => client::create_room(&config, &room).await,
        Some(Commands::Whoami) => client::whoami(&config),
        None => enter(&config, None, None).await,
    }
}

async fn enter(config: &Config, username: Option<String>, room: Option<String>) -> Result<()> {
    match client::enter_room(config, username, room).await? {
        RoomExit::Left => println!("Left the room."),
        RoomExit::Detached => println!("Closed the room view; you are still a member."),
    }
    Ok(())
}
