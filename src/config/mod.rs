//! Configuration and durable client state

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "http://api.evntfy.tech/api/v1";
const API_BASE_URL_ENV: &str = "EVENTIFY_API_BASE_URL";

/// Application configuration (`config.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL all API paths are relative to
    pub api_base_url: String,
    /// Per-request transport timeout
    pub request_timeout_secs: u64,
    /// Retries for network failures, 408, 429 and 5xx answers
    pub request_retries: u32,
    /// First retry delay; doubles per retry
    pub request_retry_delay_ms: u64,
    /// Renew this long before the access credential expires
    pub renewal_skew_secs: u64,
    /// Minimum delay before a proactive renewal fires
    pub renewal_floor_secs: u64,
    /// Upper bound on a single renewal call
    pub renewal_timeout_secs: u64,
    /// First stream reconnect delay; doubles per attempt
    pub stream_base_delay_ms: u64,
    /// Stream reconnect attempts before giving up until the next credential
    pub stream_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: 30,
            request_retries: 3,
            request_retry_delay_ms: 1000,
            renewal_skew_secs: 180,
            renewal_floor_secs: 5,
            renewal_timeout_secs: 30,
            stream_base_delay_ms: 1000,
            stream_max_attempts: 5,
        }
    }
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("tech", "evntfy", "eventify").context("Could not determine config directory")
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Directory holding durable client state (session flag, cookie jar)
    pub fn data_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Load configuration from disk, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read config file")?;
            Self::parse(&content)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var(API_BASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.api_base_url = url.trim().to_string();
            }
        }

        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_retry_delay(&self) -> Duration {
        Duration::from_millis(self.request_retry_delay_ms)
    }

    pub fn renewal_skew(&self) -> Duration {
        Duration::from_secs(self.renewal_skew_secs)
    }

    pub fn renewal_floor(&self) -> Duration {
        Duration::from_secs(self.renewal_floor_secs)
    }

    pub fn renewal_timeout(&self) -> Duration {
        Duration::from_secs(self.renewal_timeout_secs)
    }

    pub fn stream_base_delay(&self) -> Duration {
        Duration::from_millis(self.stream_base_delay_ms)
    }
}

/// State that must survive restarts (`state.toml`)
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    /// Set by an explicit sign-out; suppresses session restore at startup
    #[serde(default)]
    pub manually_signed_out: bool,
}

impl PersistedState {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).context("Failed to read state file")?;
        toml::from_str(&content).context("Failed to parse state file")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize state")?;
        write_private(path, &content)
    }
}

/// Write a file readable only by the current user, creating parent dirs.
pub(crate) fn write_private(path: &Path, content: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("Failed to create data directory")?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;

    // Restrictive permissions: the cookie jar holds the refresh credential
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms).context("Failed to set file permissions")?;
    }

    Ok(())
}
