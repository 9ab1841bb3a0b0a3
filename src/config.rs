use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Main configuration structure for RepoScout
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// GitHub authentication and API settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Polling behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// State database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token"

    /// Literal token, used only when neither gh CLI nor GITHUB_TOKEN provide one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// REST API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Minutes between scheduled syncs (never less than 5)
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Maximum repositories synced at the same time
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Attempts per GitHub request, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Timeout for a single repository sync in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Run a full sync as soon as the scheduler starts
    #[serde(default = "default_true")]
    pub sync_on_start: bool,
}

/// Database configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite database location
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Log file location
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_interval_minutes() -> u64 {
    30
}
fn default_max_parallel() -> usize {
    3
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_timeout() -> u64 {
    300
}

fn data_home() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        data_home
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share", home)
    } else {
        "/tmp".to_string()
    }
}

fn default_database_path() -> String {
    format!("{}/reposcout/reposcout.db", data_home())
}

fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/reposcout.pid", runtime_dir)
    } else {
        "/tmp/reposcout.pid".to_string()
    }
}

fn default_log_file() -> String {
    format!("{}/reposcout/daemon.log", data_home())
}
fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            auth_method: default_auth_method(),
            token: None,
            api_url: default_api_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            max_parallel: default_max_parallel(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout: default_timeout(),
            sync_on_start: default_true(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SyncConfig {
    /// Retry policy for GitHub requests
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
    }

    /// Configured interval, before the scheduler applies its minimum
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn repo_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            config.expand_paths()?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("reposcout").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.database.path = shellexpand::full(&self.database.path)
            .context("Failed to expand database path")?
            .into_owned();

        self.daemon.pid_file = shellexpand::full(&self.daemon.pid_file)
            .context("Failed to expand pid_file path")?
            .into_owned();

        self.daemon.log_file = shellexpand::full(&self.daemon.log_file)
            .context("Failed to expand log_file path")?
            .into_owned();

        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.github.auth_method, "auto");
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert!(config.github.token.is_none());
        assert_eq!(config.sync.interval_minutes, 30);
        assert_eq!(config.sync.max_parallel, 3);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.base_delay_ms, 1000);
        assert!(config.sync.sync_on_start);
        assert!(config.database.path.ends_with("reposcout/reposcout.db"));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let mut config = Config::default();
        config.sync.max_retries = 5;
        config.sync.base_delay_ms = 250;

        let policy = config.sync.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }

    #[test]
    #[serial]
    fn test_expand_paths() {
        env::set_var("TEST_REPOSCOUT_HOME", "/test/home");

        let mut config = Config::default();
        config.database.path = "${TEST_REPOSCOUT_HOME}/scout.db".to_string();

        config.expand_paths().expect("Failed to expand paths");

        assert_eq!(config.database.path, "/test/home/scout.db");

        env::remove_var("TEST_REPOSCOUT_HOME");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.yml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.yml");

        let mut config = Config::default();
        config.database.path = "/custom/scout.db".to_string();
        config.sync.interval_minutes = 60;
        config.sync.max_parallel = 2;

        config.save(&config_path).expect("Failed to save config");
        let loaded = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded.database.path, "/custom/scout.db");
        assert_eq!(loaded.sync.interval_minutes, 60);
        assert_eq!(loaded.sync.max_parallel, 2);
    }

    #[test]
    fn test_yaml_parsing_with_partial_sections() {
        let yaml_content = r#"
github:
  auth_method: "token"
  api_url: "http://localhost:8080"
sync:
  interval_minutes: 2
  base_delay_ms: 10
database:
  path: "/var/lib/reposcout/state.db"
logging:
  level: "debug"
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.github.auth_method, "token");
        assert_eq!(config.github.api_url, "http://localhost:8080");
        assert_eq!(config.github.request_timeout, 30);
        assert_eq!(config.sync.interval_minutes, 2);
        assert_eq!(config.sync.base_delay_ms, 10);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.database.path, "/var/lib/reposcout/state.db");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_config_default_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("reposcout"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }
}
