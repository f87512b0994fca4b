//! Configuration management for the CloudSave client.
//!
//! Loads configuration from a TOML file with environment variable overrides.

use crate::repository::RepositoryMode;
use crate::scanner::DEFAULT_MAX_BACKUPS;
use crate::utils::errors::{Result, SaveError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATASTORE: &str = "CLOUDSAVE_DATASTORE";
pub const ENV_USERNAME: &str = "CLOUDSAVE_USERNAME";
pub const ENV_PASSWORD: &str = "CLOUDSAVE_PASSWORD";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub datastore: DatastoreConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,

    /// Credentials from the environment, used for remotes without an entry
    #[serde(skip)]
    pub default_credentials: Option<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Repository root
    #[serde(default = "default_datastore_path")]
    pub path: PathBuf,

    /// `lazy` rehashes on every read, `eager` preloads a cache
    #[serde(default)]
    pub mode: RepositoryMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// zstd level (1-22)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Ask on the terminal
    #[default]
    Prompt,
    Local,
    Remote,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub on_conflict: ConflictPolicy,

    /// Connect and metadata request timeout; 0 disables it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_datastore_path() -> PathBuf {
    home_dir().join(".cloudsave").join("data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_compression_level() -> i32 {
    crate::archive::DEFAULT_COMPRESSION_LEVEL
}

fn default_max_backups() -> usize {
    DEFAULT_MAX_BACKUPS
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            path: default_datastore_path(),
            mode: RepositoryMode::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_backups: default_max_backups(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            on_conflict: ConflictPolicy::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// `~/.cloudsave/config.toml`
    pub fn default_path() -> PathBuf {
        home_dir().join(".cloudsave").join("config.toml")
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SaveError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SaveError::Config(e.to_string()))
    }

    /// Explicit file if given, else the default file if present, else
    /// defaults; environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::default_path();
                if default_path.is_file() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override settings from environment variables
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var(ENV_DATASTORE).filter(|p| !p.is_empty()) {
            self.datastore.path = PathBuf::from(path);
        }

        if let (Some(username), Some(password)) = (var(ENV_USERNAME), var(ENV_PASSWORD)) {
            self.default_credentials = Some((username, password));
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.sync.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.datastore.mode, RepositoryMode::Lazy);
        assert_eq!(config.backup.max_backups, 6);
        assert_eq!(config.archive.compression_level, 3);
        assert_eq!(config.sync.on_conflict, ConflictPolicy::Prompt);
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert!(config.remotes.is_empty());
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml(
            r#"
            [datastore]
            path = "/var/lib/cloudsave"
            mode = "eager"

            [log]
            level = "debug"

            [backup]
            max_backups = 3

            [sync]
            on_conflict = "remote"
            timeout_secs = 0

            [[remotes]]
            url = "https://saves.example.org"
            username = "alice"
            password = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.datastore.path, PathBuf::from("/var/lib/cloudsave"));
        assert_eq!(config.datastore.mode, RepositoryMode::Eager);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.backup.max_backups, 3);
        assert_eq!(config.sync.on_conflict, ConflictPolicy::Remote);
        assert_eq!(config.timeout(), None);
        assert_eq!(config.remotes[0].username, "alice");
    }

    #[test]
    fn test_invalid_mode_is_config_error() {
        let result = Config::from_toml("[datastore]\nmode = \"sometimes\"\n");
        assert!(matches!(result, Err(SaveError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DATASTORE, "/tmp/store"),
            (ENV_USERNAME, "bob"),
            (ENV_PASSWORD, "hunter2"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.datastore.path, PathBuf::from("/tmp/store"));
        assert_eq!(
            config.default_credentials,
            Some(("bob".to_string(), "hunter2".to_string()))
        );
    }
}
