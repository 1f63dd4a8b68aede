//! Configuration layer: typed settings with layered precedence (file → env).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const ENV_PREFIX: &str = "KASHA";

const DEFAULT_ASYNC_TOPIC: &str = "kasha-async-queue";
const DEFAULT_SYNC_TOPIC: &str = "kasha-sync-queue";
const DEFAULT_REPLY_TOPIC: &str = "kasha-reply";
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOCK_POLL_INTERVAL_MILLIS: u64 = 500;
const DEFAULT_CALLBACK_RETRIES: u32 = 3;
const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REFRESH_AHEAD_SECS: u64 = 10;
const DEFAULT_UNAVAILABLE_WINDOW_SECS: u64 = 10;
const DEFAULT_USER_AGENT: &str = "kasha";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: LogLevel,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Topic for fire-and-forget dispatches (`noWait` or callback present).
    pub async_topic: String,
    /// Topic for synchronous request/response dispatches.
    pub sync_topic: String,
    /// Topic this instance listens on for worker replies.
    pub reply_topic: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            async_topic: DEFAULT_ASYNC_TOPIC.to_string(),
            sync_topic: DEFAULT_SYNC_TOPIC.to_string(),
            reply_topic: DEFAULT_REPLY_TOPIC.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Seconds before a held lock counts as abandoned; also bounds the wait.
    pub timeout_secs: u64,
    /// Poll interval while waiting on a lock.
    pub poll_interval_millis: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            poll_interval_millis: DEFAULT_LOCK_POLL_INTERVAL_MILLIS,
        }
    }
}

impl LockSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallbackSettings {
    /// Total webhook attempts per delivery.
    pub retries: u32,
    /// Per-attempt timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_CALLBACK_RETRIES,
            timeout_secs: DEFAULT_CALLBACK_TIMEOUT_SECS,
        }
    }
}

impl CallbackSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FreshnessSettings {
    /// Refresh-ahead horizon before private expiry, in seconds.
    pub refresh_ahead_secs: u64,
    /// How long a recorded outage keeps the origin marked unavailable.
    pub unavailable_window_secs: u64,
}

impl Default for FreshnessSettings {
    fn default() -> Self {
        Self {
            refresh_ahead_secs: DEFAULT_REFRESH_AHEAD_SECS,
            unavailable_window_secs: DEFAULT_UNAVAILABLE_WINDOW_SECS,
        }
    }
}

impl FreshnessSettings {
    pub fn refresh_ahead(&self) -> Duration {
        Duration::from_secs(self.refresh_ahead_secs)
    }

    pub fn unavailable_window(&self) -> Duration {
        Duration::from_secs(self.unavailable_window_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Identity sent as `User-Agent` on callbacks and proxy fetches.
    pub user_agent: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Process-wide settings: loaded at startup, injected into each request's
/// handling context rather than read from ambient globals.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub broker: BrokerSettings,
    pub lock: LockSettings,
    pub callback: CallbackSettings,
    pub freshness: FreshnessSettings,
    pub service: ServiceSettings,
}

impl Settings {
    /// Load settings with layered precedence: built-in defaults, then the
    /// default config file (if present), then an explicit file, then
    /// `KASHA__*` environment variables.
    pub fn load(config_file: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder =
            Config::builder().add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false));

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
