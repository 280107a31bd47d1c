pub mod api;
pub mod auth;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod payload;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use auth::Authenticator;
use db::Queue;
use error::HookError;
use logging::LogRotation;
use worker::WorkerSettings;

const DEFAULT_DATABASE_PATH: &str = "hook_queue.db";
const DEFAULT_SHELL: &str = "bash";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Deserialize, Clone)]
pub struct HookConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Scratch space for checkouts
    #[serde(default = "std::env::temp_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Upper bound for any single git/rsync/script invocation. Unset means
    /// commands may run forever.
    pub command_timeout_secs: Option<u64>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Enables a rolling log file in this directory
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_rotation: LogRotation,
    /// Branch name to webhook secret
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE_PATH)
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            work_dir: std::env::temp_dir(),
            shell: default_shell(),
            command_timeout_secs: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            log_dir: None,
            log_rotation: LogRotation::default(),
            tokens: HashMap::new(),
        }
    }
}

impl HookConfig {
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            work_dir: self.work_dir.clone(),
            shell: self.shell.clone(),
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        // a zero interval would turn the idle wait into a busy loop
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<HookConfig, HookError> {
    let path = path.as_ref();
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        HookError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    toml::from_str(&config_str).map_err(|e| {
        HookError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

pub struct AppState {
    pub authenticator: Authenticator,
    pub queue: Queue,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(authenticator: Authenticator, queue: Queue) -> Self {
        Self {
            authenticator,
            queue,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: HookConfig = toml::from_str(
            r#"
            database_path = "/var/lib/hooks/queue.db"
            work_dir = "/var/tmp/hooks"
            shell = "sh"
            command_timeout_secs = 600
            poll_interval_secs = 2
            log_dir = "/var/log/hooks"
            log_rotation = "hourly"

            [tokens]
            master = "abc"
            staging = "def"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.database_path, PathBuf::from("/var/lib/hooks/queue.db"));
        assert_eq!(config.worker_settings().shell, "sh");
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.tokens.get("staging").map(String::as_str), Some("def"));
        assert_eq!(config.log_rotation, LogRotation::Hourly);
    }

    #[test]
    fn missing_keys_use_defaults() {
        let config: HookConfig = toml::from_str("").expect("empty config");
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DATABASE_PATH));
        assert_eq!(config.shell, DEFAULT_SHELL);
        assert_eq!(config.command_timeout(), None);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert!(config.tokens.is_empty());
        assert_eq!(config.log_rotation, LogRotation::Daily);
    }

    #[test]
    fn unknown_log_rotation_is_rejected() {
        let err = toml::from_str::<HookConfig>("log_rotation = \"weekly\"").unwrap_err();
        assert!(err.to_string().contains("weekly"));
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config: HookConfig = toml::from_str("poll_interval_secs = 0").expect("config");
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn load_config_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_config(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, HookError::ConfigError(_)));
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hook_config.toml");
        std::fs::write(&path, "[tokens]\nmaster = \"abc\"\n").expect("write");
        let config = load_config(&path).expect("load");
        assert_eq!(config.tokens.len(), 1);
    }
}
