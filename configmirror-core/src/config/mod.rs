//! Configuration management for the mirror agent
//!
//! Defaults, TOML files and `CONFIGMIRROR_<SECTION>_<KEY>` environment
//! overrides, validated before use.

use crate::core_link::ResyncPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

mod error;

pub use error::ConfigError;

const ENV_PREFIX: &str = "CONFIGMIRROR";

/// Main agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Authority endpoints and reconnect behaviour
    pub server: ServerConfig,

    /// How this instance presents itself
    pub identity: IdentityConfig,

    /// Replica persistence
    pub store: StoreConfig,

    /// Periodic metrics reports
    pub telemetry: TelemetryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Authority configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the authority, e.g. `http://localhost:5000`
    pub url: String,

    /// Push-channel path, relative to `url`
    pub hub_path: String,

    /// Bulk-load path, relative to `url`
    pub configuration_path: String,

    /// Wait before each reconnect attempt, in milliseconds
    pub reconnect_delays_ms: Vec<u64>,

    /// Bulk-load request and hub handshake timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Client ping interval on the hub connection
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,
}

/// Identity configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Instance id; prompted for (or generated) when absent
    pub instance_id: Option<String>,

    /// Address reported at registration; detected when absent
    pub local_address: Option<String>,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the snapshot files
    pub data_dir: PathBuf,

    /// Seed the replica from existing snapshot files on startup
    pub warm_start: bool,

    /// What to do with the replica after a reconnect
    pub resync_policy: ResyncPolicy,
}

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Send ReportMetrics while connected
    pub enabled: bool,

    /// Interval between reports
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".to_string(),
            hub_path: "/configHub".to_string(),
            configuration_path: "/api/configuration".to_string(),
            reconnect_delays_ms: vec![0, 2_000, 10_000, 30_000],
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            warm_start: true,
            resync_policy: ResyncPolicy::Disabled,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval: Duration::from_secs(10),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl ServerConfig {
    fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        let base = Url::parse(&self.url).map_err(|e| self.url_error(e))?;
        base.join(path)
            .map_err(|e| self.url_error(format!("cannot append {}: {}", path, e)))
    }

    /// WebSocket URL of the push channel
    pub fn hub_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.endpoint(&self.hub_path)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(self.url_error(format!("unsupported scheme {}", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| self.url_error(format!("cannot switch to {}", scheme)))?;
        Ok(url)
    }

    /// HTTP URL of the bulk-load endpoint
    pub fn configuration_url(&self) -> Result<Url, ConfigError> {
        self.endpoint(&self.configuration_path)
    }

    fn url_error(&self, reason: impl std::fmt::Display) -> ConfigError {
        ConfigError::InvalidServerUrl {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn reconnect_delays(&self) -> Vec<Duration> {
        self.reconnect_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}: {}", key, e)))
}

impl AgentConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: CONFIGMIRROR_<SECTION>_<KEY>
    /// Example: CONFIGMIRROR_SERVER_URL=http://authority:5000
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}_{}", ENV_PREFIX, name));

        // Server config
        if let Some(url) = var("SERVER_URL") {
            self.server.url = url;
        }
        if let Some(path) = var("SERVER_HUB_PATH") {
            self.server.hub_path = path;
        }
        if let Some(path) = var("SERVER_CONFIGURATION_PATH") {
            self.server.configuration_path = path;
        }
        if let Some(delays) = var("SERVER_RECONNECT_DELAYS_MS") {
            self.server.reconnect_delays_ms = delays
                .split(',')
                .map(|d| d.trim().parse::<u64>())
                .collect::<Result<_, _>>()
                .map_err(|e| ConfigError::InvalidReconnectDelays(format!("{:?}: {}", delays, e)))?;
        }
        if let Some(timeout) = var("SERVER_REQUEST_TIMEOUT") {
            self.server.request_timeout = humantime::parse_duration(&timeout)
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid request timeout: {}", e)))?;
        }

        // Identity config
        if let Some(id) = var("IDENTITY_INSTANCE_ID") {
            self.identity.instance_id = Some(id);
        }
        if let Some(address) = var("IDENTITY_LOCAL_ADDRESS") {
            self.identity.local_address = Some(address);
        }

        // Store config
        if let Some(data_dir) = var("STORE_DATA_DIR") {
            self.store.data_dir = PathBuf::from(data_dir);
        }
        if let Some(warm_start) = var("STORE_WARM_START") {
            self.store.warm_start = parse_env("warm start flag", &warm_start)?;
        }
        if let Some(resync) = var("STORE_RESYNC_ON_RECONNECT") {
            let enabled: bool = parse_env("resync flag", &resync)?;
            self.store.resync_policy = if enabled {
                ResyncPolicy::Replace
            } else {
                ResyncPolicy::Disabled
            };
        }

        // Telemetry config
        if let Some(enabled) = var("TELEMETRY_ENABLED") {
            self.telemetry.enabled = parse_env("telemetry flag", &enabled)?;
        }
        if let Some(interval) = var("TELEMETRY_REPORT_INTERVAL") {
            self.telemetry.report_interval = humantime::parse_duration(&interval)
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid report interval: {}", e)))?;
        }

        // Logging config
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = var("LOG_JSON") {
            self.logging.json_format = parse_env("JSON flag", &json)?;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server config
        self.server.hub_url()?;
        self.server.configuration_url()?;

        if self.server.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        if self.server.keepalive_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "keepalive_interval must be greater than 0".to_string(),
            ));
        }

        // Validate identity config
        if let Some(id) = &self.identity.instance_id {
            if id.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "instance_id must not be blank".to_string(),
                ));
            }
        }

        // Validate telemetry config
        if self.telemetry.enabled && self.telemetry.report_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "report_interval must be greater than 0".to_string(),
            ));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        let path = path.as_ref();
        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(())
    }
}
