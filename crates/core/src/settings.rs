use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_NOTIFICATION_TTL_MS: u64 = 3_000;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub notification_ttl_ms: u64,
    pub export_dir: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            notification_ttl_ms: DEFAULT_NOTIFICATION_TTL_MS,
            export_dir: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    #[must_use]
    pub fn notification_ttl(&self) -> Duration {
        Duration::from_millis(self.notification_ttl_ms)
    }

    #[must_use]
    pub fn export_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Applies `NLQ_API_URL` on top of whatever was loaded from disk.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = env::var("NLQ_API_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
        {
            self.api_base_url = url.trim().to_string();
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub fn load_default() -> Result<ClientSettings, SettingsError> {
    let path = default_settings_path()?;
    Ok(load_from_path(&path)?.with_env_overrides())
}

/// Missing or blank files yield the defaults.
pub fn load_from_path(path: &Path) -> Result<ClientSettings, SettingsError> {
    if !path.exists() {
        return Ok(ClientSettings::default());
    }

    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(ClientSettings::default());
    }

    toml::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn config_dir() -> Result<PathBuf, SettingsError> {
    if let Some(custom) = env::var_os("NLQ_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(SettingsError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(SettingsError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("nlq"))
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    Ok(config_dir()?.join("config.toml"))
}
