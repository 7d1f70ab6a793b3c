//! # depot-config
//!
//! Configuration management for Depot.
//!
//! Loads configuration from:
//! 1. `~/.depot/config.toml` (global)
//! 2. `.depot/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

pub mod logging;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap()
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap() = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub daemon: DaemonConfig,
    pub limits: LimitConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.depot/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        // 2. Project config (.depot/config.toml) - overrides global
        let project_path = Path::new(".depot/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(project_path)?;
            let project: Config = toml::from_str(&contents)?;
            config = project;
        }

        // 3. Environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Global config path: ~/.depot/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".depot/config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("DEPOT_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("DEPOT_SOCKET") {
            self.daemon.socket = PathBuf::from(path);
        }
        if let Ok(max) = std::env::var("DEPOT_MAX_UPLOAD_BYTES") {
            if let Ok(n) = max.parse() {
                self.limits.max_upload_bytes = n;
            }
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap()
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data root: blobs live under `<data_dir>/blobs`, metadata in
    /// `<data_dir>/depot.db`.
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Blob store root directory.
    pub fn blob_root(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    /// SQLite database path.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("depot.db")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            data_dir: home.join(".depot/data"),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path
    pub socket: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            socket: home.join(".depot/depotd.sock"),
        }
    }
}

/// Upload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Maximum accepted upload payload in bytes.
    pub max_upload_bytes: u64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            // 64 MiB, matching the wire frame ceiling.
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.storage.data_dir.ends_with(".depot/data"));
        assert!(config.limits.max_upload_bytes > 0);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[daemon]"));
        assert!(toml_str.contains("[limits]"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.storage.data_dir, parsed.storage.data_dir);
        assert_eq!(config.limits.max_upload_bytes, parsed.limits.max_upload_bytes);
    }

    #[test]
    fn test_derived_paths() {
        let config = Config::default();
        assert!(config.storage.blob_root().ends_with("blobs"));
        assert!(config.storage.db_path().ends_with("depot.db"));
    }
}
