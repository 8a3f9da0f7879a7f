//! Client configuration stored in ~/.recapdesk/config.json.
//!
//! Every field has a serde default so a missing or partial file is fine.
//! `RECAPDESK_API_URL` overrides the base URL, `RECAPDESK_HOME` the directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

pub const API_URL_ENV: &str = "RECAPDESK_API_URL";
pub const HOME_ENV: &str = "RECAPDESK_HOME";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Interval between status checks while a run is processing.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            default_model: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        // A zero interval would spin the poller.
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// State directory: `$RECAPDESK_HOME` or ~/.recapdesk
pub fn state_dir() -> Result<PathBuf, StateError> {
    if let Ok(dir) = std::env::var(HOME_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = dirs::home_dir()
        .ok_or_else(|| StateError::Config("Could not find home directory".to_string()))?;
    Ok(home.join(".recapdesk"))
}

/// Get the canonical config file path
pub fn config_path() -> Result<PathBuf, StateError> {
    Ok(state_dir()?.join("config.json"))
}

/// Load the config, falling back to defaults when the file is absent, then
/// apply the environment override.
pub fn load_config() -> Result<Config, StateError> {
    let mut config = load_config_from(&config_path()?)?;
    if let Ok(url) = std::env::var(API_URL_ENV) {
        if !url.trim().is_empty() {
            config.api_base_url = url.trim().to_string();
        }
    }
    Ok(config)
}

pub fn load_config_from(path: &Path) -> Result<Config, StateError> {
    if !path.exists() {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| StateError::Config(format!("Failed to read config: {}", e)))?;

    serde_json::from_str(&content)
        .map_err(|e| StateError::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write the config, creating the parent directory when needed.
pub fn save_config_to(path: &Path, config: &Config) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| StateError::Config(format!("Failed to create config dir: {}", e)))?;
        }
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| StateError::Config(format!("Serialize error: {}", e)))?;
    fs::write(path, content).map_err(|e| StateError::Config(format!("Write error: {}", e)))
}
