//! Configuration file parsing and structures.
//!
//! aurod reads a single TOML file naming the hosted store, the simulator
//! cadence, the local API bind address, and logging.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    pub store: StoreConfig,

    #[serde(default)]
    pub simulator: SimulatorConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
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

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

/// Hosted store connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Project base URL, e.g. "https://abc123.example.co"
    pub url: String,

    /// Service API key, sent as both `apikey` and bearer token
    pub api_key: String,

    /// Table holding machine rows
    #[serde(default = "default_table")]
    pub table: String,

    /// Websocket base URL; derived from `url` when absent
    #[serde(default)]
    pub ws_url: Option<String>,
}

impl StoreConfig {
    /// Base URL for the realtime websocket.
    pub fn ws_base(&self) -> String {
        match &self.ws_url {
            Some(ws_url) => ws_url.trim_end_matches('/').to_string(),
            None => {
                let base = self.url.trim_end_matches('/');
                if let Some(rest) = base.strip_prefix("https://") {
                    format!("wss://{}", rest)
                } else if let Some(rest) = base.strip_prefix("http://") {
                    format!("ws://{}", rest)
                } else {
                    base.to_string()
                }
            }
        }
    }
}

fn default_table() -> String {
    "machines".to_string()
}

/// Status simulator settings
#[derive(Debug, Deserialize)]
pub struct SimulatorConfig {
    /// Whether this instance drives the periodic refresh
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minutes between refresh cycles
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

impl SimulatorConfig {
    /// Refresh period, or `None` when the simulator is disabled.
    pub fn period(&self) -> Option<Duration> {
        self.enabled
            .then(|| Duration::from_secs(self.interval_minutes * 60))
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 45,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_minutes() -> u64 {
    45
}

/// Local HTTP API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8565
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}
