//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/taskline/config.toml)
//! 3. Environment variables (TASKLINE_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::retry::RetryPolicy;
use crate::storage::{FileFormat, StorageKind};

/// Environment variable prefix
const ENV_PREFIX: &str = "TASKLINE";

/// Default task-list service
pub const DEFAULT_API_URL: &str = "https://hive.mrdekk.ru";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the local cache and sync state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the task-list service
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Bearer token for the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Stamped as `last_updated_by` on local edits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Local cache backend
    #[serde(default)]
    pub storage: StorageKind,

    /// Encoding used by the file backend
    #[serde(default)]
    pub file_format: FileFormat,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Try a patch right after a failed load
    #[serde(default = "default_true")]
    pub repair_on_load: bool,
}

/// Retry tuning as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 2_000,
            max_delay_ms: 120_000,
            factor: 2.0,
            jitter: 0.05,
            max_attempts: 6,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            factor: config.factor,
            jitter: config.jitter,
            max_attempts: config.max_attempts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_url: default_api_url(),
            token: None,
            device_id: None,
            storage: StorageKind::default(),
            file_format: FileFormat::default(),
            retry: RetryConfig::default(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            repair_on_load: true,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (TASKLINE_DATA_DIR, TASKLINE_API_URL, ...)
    /// 2. Config file (~/.config/taskline/config.toml or TASKLINE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.api_url = val;
            }
        }

        // Empty string clears it
        if let Ok(val) = std::env::var(format!("{}_TOKEN", ENV_PREFIX)) {
            self.token = non_empty(val);
        }

        if let Ok(val) = std::env::var(format!("{}_DEVICE_ID", ENV_PREFIX)) {
            self.device_id = non_empty(val);
        }

        if let Ok(val) = std::env::var(format!("{}_STORAGE", ENV_PREFIX)) {
            match val.parse() {
                Ok(kind) => self.storage = kind,
                Err(e) => warn!(value = %val, "Ignoring {}_STORAGE: {}", ENV_PREFIX, e),
            }
        }

        if let Ok(val) = std::env::var(format!("{}_FILE_FORMAT", ENV_PREFIX)) {
            match val.parse() {
                Ok(format) => self.file_format = format,
                Err(e) => warn!(value = %val, "Ignoring {}_FILE_FORMAT: {}", ENV_PREFIX, e),
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Update one setting by its key name, e.g. `storage` or `retry.max_attempts`
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "api_url" => self.api_url = value.trim_end_matches('/').to_string(),
            "token" => self.token = non_empty(value.to_string()),
            "device_id" => self.device_id = non_empty(value.to_string()),
            "storage" => self.storage = value.parse().map_err(anyhow::Error::msg)?,
            "file_format" => self.file_format = value.parse().map_err(anyhow::Error::msg)?,
            "retry.min_delay_ms" => self.retry.min_delay_ms = parse_value(key, value)?,
            "retry.max_delay_ms" => self.retry.max_delay_ms = parse_value(key, value)?,
            "retry.factor" => self.retry.factor = parse_value(key, value)?,
            "retry.jitter" => self.retry.jitter = parse_value(key, value)?,
            "retry.max_attempts" => self.retry.max_attempts = parse_value(key, value)?,
            "connect_timeout_secs" => self.connect_timeout_secs = parse_value(key, value)?,
            "request_timeout_secs" => self.request_timeout_secs = parse_value(key, value)?,
            "repair_on_load" => self.repair_on_load = parse_value(key, value)?,
            other => bail!("Unknown config key: {}", other),
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with TASKLINE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("taskline")
            .join("config.toml")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    /// Path of the flat-file cache for the configured format
    pub fn items_file_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("items.{}", self.file_format.extension()))
    }

    /// Get the path to the Automerge document file
    pub fn document_path(&self) -> PathBuf {
        self.data_dir.join("items.automerge")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("items.sqlite3")
    }

    /// Get the path to the persisted sync state
    pub fn sync_state_path(&self) -> PathBuf {
        self.data_dir.join("sync_state.json")
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, value, e))
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskline")
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "TASKLINE_DATA_DIR",
        "TASKLINE_API_URL",
        "TASKLINE_TOKEN",
        "TASKLINE_DEVICE_ID",
        "TASKLINE_STORAGE",
        "TASKLINE_FILE_FORMAT",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert!(config.token.is_none());
        assert_eq!(config.storage, StorageKind::Object);
        assert_eq!(config.file_format, FileFormat::Json);
        assert!(config.repair_on_load);
        assert!(config.data_dir.ends_with("taskline"));
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = Config::default().retry_policy();
        assert_eq!(policy, RetryPolicy::default());
        assert_eq!(policy.min_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(120));
        assert_eq!(policy.max_attempts, 6);
    }

    #[test]
    fn test_file_paths() {
        let mut config = Config::default();
        assert!(config.items_file_path().ends_with("items.json"));
        config.file_format = FileFormat::Csv;
        assert!(config.items_file_path().ends_with("items.csv"));
        assert!(config.document_path().ends_with("items.automerge"));
        assert!(config.sqlite_path().ends_with("items.sqlite3"));
        assert!(config.sync_state_path().ends_with("sync_state.json"));
    }

    #[test]
    fn test_env_overrides() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("TASKLINE_DATA_DIR", "/tmp/taskline-test");
        env::set_var("TASKLINE_TOKEN", "abc");
        env::set_var("TASKLINE_STORAGE", "sqlite");
        env::set_var("TASKLINE_FILE_FORMAT", "csv");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/taskline-test"));
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.storage, StorageKind::Sqlite);
        assert_eq!(config.file_format, FileFormat::Csv);

        // Empty string clears, unknown backend is ignored
        env::set_var("TASKLINE_TOKEN", "");
        env::set_var("TASKLINE_STORAGE", "coredata");
        config.apply_env_overrides();
        assert!(config.token.is_none());
        assert_eq!(config.storage, StorageKind::Sqlite);
    }

    #[test]
    fn test_load_from_str_partial_retry() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            storage = "file"
            file_format = "csv"

            [retry]
            max_attempts = 2
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.storage, StorageKind::File);
        assert_eq!(config.file_format, FileFormat::Csv);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.min_delay_ms, 2_000);
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_set_by_key() {
        let mut config = Config::default();
        config.set("storage", "sqlite").unwrap();
        config.set("retry.max_attempts", "3").unwrap();
        config.set("retry.jitter", "0.1").unwrap();
        config.set("repair_on_load", "false").unwrap();
        config.set("token", "t0k3n").unwrap();

        assert_eq!(config.storage, StorageKind::Sqlite);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.jitter, 0.1);
        assert!(!config.repair_on_load);
        assert_eq!(config.token.as_deref(), Some("t0k3n"));

        assert!(config.set("storage", "swiftdata").is_err());
        assert!(config.set("retry.max_attempts", "many").is_err());
        assert!(config.set("colour", "red").is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.data_dir = temp_dir.path().join("data");
        config.token = Some("secret".to_string());
        config.storage = StorageKind::File;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.data_dir.exists());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        env::set_var("TASKLINE_DATA_DIR", temp_dir.path().join("data"));

        let config = Config::load_from_path(&temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert!(config.data_dir.exists());
    }
}
