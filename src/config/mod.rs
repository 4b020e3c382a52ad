use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::session_management::session::SESSION_TTL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config.toml is malformed: {0}")]
    Malformed(String),
}

/// Optional on-disk configuration (`<config_dir>/krypta/config.toml`).
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub vault_dir: Option<String>,
    pub session_ttl_secs: Option<u64>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub vault_dir: PathBuf,
    pub session_ttl: Duration,
}

impl Config {
    /// Precedence per key: environment > config file > built-in default.
    /// `KRYPTA_VAULT_DIR` and `KRYPTA_SESSION_TTL` are the env overrides.
    pub fn create() -> Result<Self, ConfigError> {
        let file_cfg = load_file_config()?;

        let vault_dir = env::var("KRYPTA_VAULT_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| file_cfg.vault_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(default_vault_dir);

        let session_ttl = env::var("KRYPTA_SESSION_TTL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .or(file_cfg.session_ttl_secs)
            .map(Duration::from_secs)
            .unwrap_or(SESSION_TTL);

        Ok(Self {
            vault_dir,
            session_ttl,
        })
    }
}

fn default_vault_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("krypta")
        .join("vault")
}

fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("krypta").join("config.toml"))
}

fn load_file_config() -> Result<FileConfig, ConfigError> {
    let Some(path) = config_file_path() else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| ConfigError::Malformed(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::Malformed(e.to_string()))
}
