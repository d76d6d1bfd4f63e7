//! Configuration management for pagevault using the prefer crate.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;
/// Default cap on a single response body (10 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;
/// Default redirect bound.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;
/// Default cap on distinct assets captured per snapshot.
pub const DEFAULT_MAX_ASSETS: usize = 200;
/// Default cap on the total bytes of one snapshot (50 MiB).
pub const DEFAULT_MAX_SNAPSHOT_BYTES: u64 = 50 * 1024 * 1024;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Directory holding content-addressed snapshot blobs.
    pub blobs_dir: PathBuf,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Request timeout in seconds (per fetch).
    pub request_timeout: u64,
    /// Maximum accepted response body size in bytes.
    pub max_response_bytes: u64,
    /// Maximum number of redirects followed per fetch.
    pub max_redirects: usize,
    /// Permit fetching loopback and private network addresses.
    pub allow_private_networks: bool,
    /// Number of background archive workers.
    pub worker_count: usize,
    /// Concurrent asset fetches within one archive attempt.
    pub asset_concurrency: usize,
    /// Optional wall-clock budget for a whole archive attempt, in seconds.
    pub archive_timeout: Option<u64>,
    /// Distinct assets captured per snapshot.
    pub max_assets: usize,
    /// Total bytes kept for one snapshot.
    pub max_snapshot_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to ~/Documents/pagevault/ for user data
        let data_dir = dirs::document_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("pagevault");

        Self {
            blobs_dir: data_dir.join("blobs"),
            data_dir,
            database_filename: "pagevault.db".to_string(),
            user_agent: "pagevault/0.4 (offline bookmark archiver)".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            allow_private_networks: false,
            worker_count: 2,
            asset_concurrency: 4,
            archive_timeout: None,
            max_assets: DEFAULT_MAX_ASSETS,
            max_snapshot_bytes: DEFAULT_MAX_SNAPSHOT_BYTES,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            blobs_dir: data_dir.join("blobs"),
            data_dir,
            ..Default::default()
        }
    }

    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Per-fetch timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Whole-attempt budget, if configured.
    pub fn archive_timeout(&self) -> Option<Duration> {
        self.archive_timeout.map(Duration::from_secs)
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.blobs_dir)?;
        Ok(())
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default)]
    pub target: Option<String>,
    /// Database filename.
    #[serde(default)]
    pub database: Option<String>,
    /// User agent string.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,
    /// Maximum response size in bytes.
    #[serde(default)]
    pub max_response_bytes: Option<u64>,
    /// Redirect bound.
    #[serde(default)]
    pub max_redirects: Option<usize>,
    /// Allow loopback/private targets (development only).
    #[serde(default)]
    pub allow_private_networks: Option<bool>,
    /// Background archive workers.
    #[serde(default)]
    pub worker_count: Option<usize>,
    /// Concurrent asset fetches per attempt.
    #[serde(default)]
    pub asset_concurrency: Option<usize>,
    /// Whole-attempt budget in seconds.
    #[serde(default)]
    pub archive_timeout: Option<u64>,
    /// Assets captured per snapshot.
    #[serde(default)]
    pub max_assets: Option<usize>,
    /// Total snapshot size in bytes.
    #[serde(default)]
    pub max_snapshot_bytes: Option<u64>,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers pagevault config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("pagevault").await {
            Ok(pref_config) => Config {
                target: pref_config.get("target").ok(),
                database: pref_config.get("database").ok(),
                user_agent: pref_config.get("user_agent").ok(),
                request_timeout: pref_config.get("request_timeout").ok(),
                max_response_bytes: pref_config.get("max_response_bytes").ok(),
                max_redirects: pref_config.get("max_redirects").ok(),
                allow_private_networks: pref_config.get("allow_private_networks").ok(),
                worker_count: pref_config.get("worker_count").ok(),
                asset_concurrency: pref_config.get("asset_concurrency").ok(),
                archive_timeout: pref_config.get("archive_timeout").ok(),
                max_assets: pref_config.get("max_assets").ok(),
                max_snapshot_bytes: pref_config.get("max_snapshot_bytes").ok(),
            },
            Err(_) => {
                // No config file found, use defaults
                Self::default()
            }
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            let path = shellexpand::tilde(target);
            settings.data_dir = PathBuf::from(path.as_ref());
            settings.blobs_dir = settings.data_dir.join("blobs");
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(max) = self.max_response_bytes {
            settings.max_response_bytes = max;
        }
        if let Some(max) = self.max_redirects {
            settings.max_redirects = max;
        }
        if let Some(allow) = self.allow_private_networks {
            settings.allow_private_networks = allow;
        }
        if let Some(count) = self.worker_count {
            settings.worker_count = count.max(1);
        }
        if let Some(count) = self.asset_concurrency {
            settings.asset_concurrency = count.max(1);
        }
        if let Some(secs) = self.archive_timeout {
            settings.archive_timeout = Some(secs);
        }
        if let Some(max) = self.max_assets {
            settings.max_assets = max;
        }
        if let Some(max) = self.max_snapshot_bytes {
            settings.max_snapshot_bytes = max;
        }
    }
}

/// Load settings from configuration (async version).
pub async fn load_settings() -> Settings {
    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_moves_blobs_dir() {
        let config = Config {
            target: Some("/srv/vault".to_string()),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings);

        assert_eq!(settings.data_dir, PathBuf::from("/srv/vault"));
        assert_eq!(settings.blobs_dir, PathBuf::from("/srv/vault/blobs"));
        assert_eq!(settings.database_path(), PathBuf::from("/srv/vault/pagevault.db"));
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = Config {
            worker_count: Some(0),
            asset_concurrency: Some(0),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings);

        assert_eq!(settings.worker_count, 1);
        assert_eq!(settings.asset_concurrency, 1);
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_redirects, 5);
        assert!(!settings.allow_private_networks);
        assert!(settings.archive_timeout().is_none());
        assert_eq!(settings.max_assets, DEFAULT_MAX_ASSETS);
        assert_eq!(settings.max_snapshot_bytes, DEFAULT_MAX_SNAPSHOT_BYTES);
    }
}
