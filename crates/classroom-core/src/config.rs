//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the token refresh endpoint, the credential storage backend
//! and the default toast lifetime.
//!
//! Configuration is stored at `~/.config/classroom-scheduler/config.json`.
//! `CLASSROOM_REFRESH_URL` and `CLASSROOM_STORAGE` override the file.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::notify::DEFAULT_TTL_MS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "classroom-scheduler";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const REFRESH_URL_ENV: &str = "CLASSROOM_REFRESH_URL";
const STORAGE_ENV: &str = "CLASSROOM_STORAGE";

/// Where session credentials are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "keyring" | "keychain" => Ok(StorageBackend::Keyring),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

fn default_toast_ttl_ms() -> u64 {
    DEFAULT_TTL_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Token refresh endpoint. Without one, expired sessions require login.
    #[serde(default)]
    pub refresh_url: Option<String>,
    #[serde(default)]
    pub storage: StorageBackend,
    #[serde(default = "default_toast_ttl_ms")]
    pub toast_ttl_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_url: None,
            storage: StorageBackend::default(),
            toast_ttl_ms: DEFAULT_TTL_MS,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn with_env_overrides(self) -> Self {
        self.apply_overrides(
            std::env::var(REFRESH_URL_ENV).ok(),
            std::env::var(STORAGE_ENV).ok(),
        )
    }

    fn apply_overrides(mut self, refresh_url: Option<String>, storage: Option<String>) -> Self {
        if let Some(url) = refresh_url.filter(|u| !u.trim().is_empty()) {
            self.refresh_url = Some(url.trim().to_string());
        }
        if let Some(value) = storage {
            match value.parse() {
                Ok(backend) => self.storage = backend,
                Err(e) => warn!(error = %e, "Ignoring {}", STORAGE_ENV),
            }
        }
        self
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
