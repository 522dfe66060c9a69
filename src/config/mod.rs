//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variables that override [`KeysConfig`]
pub const ENV_PUBLIC_URL: &str = "LOBBY_PUBLIC_URL";
pub const ENV_ANON_KEY: &str = "LOBBY_ANON_KEY";
pub const ENV_SERVICE_KEY: &str = "LOBBY_SERVICE_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub keys: KeysConfig,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Socket and log directory
    pub runtime_dir: Option<PathBuf>,

    /// Where the remembered username lives
    pub identity_path: Option<PathBuf>,

    /// Socket file name inside the runtime directory
    pub socket_name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            runtime_dir: None,
            identity_path: None,
            socket_name: "lobby.sock".to_string(),
        }
    }
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the HTTP health endpoint
    pub health_addr: String,

    /// Rooms provisioned at startup
    pub seed_rooms: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            health_addr: "127.0.0.1:8787".to_string(),
            seed_rooms: Vec::new(),
        }
    }
}

/// Client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Read/append cycles a join may take when it keeps losing races
    pub join_attempts: u32,

    /// Connect + handshake timeout
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            join_attempts: 3,
            connect_timeout_ms: 2000,
        }
    }
}

/// Access keys. Only their presence is ever reported.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Address clients are told to use
    pub public_url: Option<String>,

    /// Key every connection must present, if set
    pub anon_key: Option<String>,

    /// Key for provisioning rooms, if set
    pub service_key: Option<String>,
}

impl std::fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysConfig")
            .field("public_url", &self.public_url)
            .field("anon_key", &self.anon_key.as_ref().map(|_| "<set>"))
            .field("service_key", &self.service_key.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl KeysConfig {
    /// Replace values with non-empty environment variables
    pub fn apply_env(&mut self) {
        apply_var(&mut self.public_url, std::env::var(ENV_PUBLIC_URL).ok());
        apply_var(&mut self.anon_key, std::env::var(ENV_ANON_KEY).ok());
        apply_var(&mut self.service_key, std::env::var(ENV_SERVICE_KEY).ok());
    }
}

fn apply_var(slot: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        *slot = Some(value);
    }
}

impl Config {
    /// Load config from `path` (or the default location), falling back to
    /// defaults if the file does not exist. Environment keys win.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Invalid config in {}", config_path.display()))?
        } else {
            Config::default()
        };

        config.keys.apply_env();
        Ok(config)
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("polybit-lobby")
            .join("config.toml")
    }

    /// Get the runtime directory for the socket and client logs
    pub fn runtime_dir(&self) -> PathBuf {
        self.general
            .runtime_dir
            .clone()
            .or_else(dirs::runtime_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("polybit-lobby")
    }

    /// Get the server socket path
    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir().join(&self.general.socket_name)
    }

    /// Get the client log file path
    pub fn client_log_path(&self) -> PathBuf {
        self.runtime_dir().join("client.log")
    }

    /// Get the remembered-username file path
    pub fn identity_path(&self) -> PathBuf {
        self.general.identity_path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("polybit-lobby")
                .join("identity.toml")
        })
    }
}
