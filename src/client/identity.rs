//! Remembered username, one per local user

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdentityFile {
    username: Option<String>,
}

/// File-backed store for the last username submitted on this machine
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The remembered username, if any
    pub fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let file: IdentityFile = toml::from_str(&content)
            .with_context(|| format!("Invalid identity file {}", self.path.display()))?;
        Ok(file.username.filter(|u| !u.trim().is_empty()))
    }

    pub fn save(&self, username: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = IdentityFile {
            username: Some(username.to_string()),
        };
        std::fs::write(&self.path, toml::to_string(&file)?)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}
