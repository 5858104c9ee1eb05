//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `ccuhub.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use ccuhub_app::event_manager::ManagerConfig;
use ccuhub_app::retry::{BackoffPolicy, RetryPolicy};
use ccuhub_domain::presence::Resident;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which controller to talk to.
    pub controller: ControllerConfig,
    /// Durable state settings.
    pub state: StateConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Subscription and de-duplication tuning.
    pub event_manager: EventManagerConfig,
    /// Log append retries.
    pub storage: StorageConfig,
    /// Schedule runner settings.
    pub schedules: SchedulesConfig,
    /// Tracked residents.
    pub presence: PresenceConfig,
}

/// Controller selection.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller backend. Only `virtual` is built in.
    pub kind: String,
    /// Display name used in logs.
    pub name: String,
}

/// State directory configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding `ccuhub.db`.
    pub state_dir: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EventManagerConfig {
    /// Number of recent events remembered for duplicate suppression.
    pub dedup_window: usize,
    /// Seconds between attempts to restore a lost subscription.
    pub resubscribe_secs: u64,
    /// Attempts when opening the subscription.
    pub subscribe_attempts: u32,
    /// Delay before the first subscribe retry, in milliseconds.
    pub subscribe_backoff_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Attempts per log append.
    pub append_attempts: u32,
    /// Delay before the first append retry, in milliseconds.
    pub append_backoff_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulesConfig {
    /// Seconds between runner ticks.
    pub tick_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub residents: Vec<Resident>,
}

impl Config {
    /// Load configuration from `ccuhub.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CCUHUB_CONFIG").unwrap_or_else(|_| "ccuhub.toml".to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CCUHUB_STATE_DIR") {
            self.state.state_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CCUHUB_CONTROLLER") {
            self.controller.kind = val;
        }
        if let Ok(val) = std::env::var("CCUHUB_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.kind != "virtual" {
            return Err(ConfigError::Validation(format!(
                "unsupported controller kind: {}",
                self.controller.kind
            )));
        }
        if self.state.state_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "state_dir must not be empty".to_string(),
            ));
        }
        if self.event_manager.dedup_window == 0 {
            return Err(ConfigError::Validation(
                "dedup_window must be non-zero".to_string(),
            ));
        }
        if self.event_manager.resubscribe_secs == 0 || self.schedules.tick_secs == 0 {
            return Err(ConfigError::Validation(
                "intervals must be non-zero".to_string(),
            ));
        }
        for resident in &self.presence.residents {
            resident
                .validate()
                .map_err(|err| ConfigError::Validation(err.to_string()))?;
        }
        Ok(())
    }

    /// Settings for the event manager.
    #[must_use]
    pub fn manager(&self) -> ManagerConfig {
        ManagerConfig {
            subscribe_retry: retry(
                self.event_manager.subscribe_attempts,
                self.event_manager.subscribe_backoff_ms,
            ),
            resubscribe_interval: Duration::from_secs(self.event_manager.resubscribe_secs),
            dedup_window: self.event_manager.dedup_window,
        }
    }

    /// Settings for the `SQLite` state directory.
    #[must_use]
    pub fn storage(&self) -> ccuhub_adapter_storage_sqlite_sqlx::Config {
        let mut storage = ccuhub_adapter_storage_sqlite_sqlx::Config::new(&self.state.state_dir);
        storage.append_retry = retry(
            self.storage.append_attempts,
            self.storage.append_backoff_ms,
        );
        storage
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.schedules.tick_secs)
    }
}

fn retry(attempts: u32, first_ms: u64) -> RetryPolicy {
    RetryPolicy {
        attempts,
        backoff: BackoffPolicy {
            first: Duration::from_millis(first_ms),
            ..BackoffPolicy::default()
        },
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kind: "virtual".to_string(),
            name: "ccu".to_string(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "ccuhubd=info,ccuhub=info".to_string(),
        }
    }
}

impl Default for EventManagerConfig {
    fn default() -> Self {
        Self {
            dedup_window: 1024,
            resubscribe_secs: 30,
            subscribe_attempts: 5,
            subscribe_backoff_ms: 200,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            append_attempts: 5,
            append_backoff_ms: 200,
        }
    }
}

impl Default for SchedulesConfig {
    fn default() -> Self {
        Self { tick_secs: 1 }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
