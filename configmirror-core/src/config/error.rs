//! Configuration error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {reason}")]
    FileReadError { path: String, reason: String },

    #[error("Cannot write {path}: {reason}")]
    FileWriteError { path: String, reason: String },

    #[error("Malformed configuration file: {0}")]
    ParseError(String),

    #[error("Failed to serialize configuration: {0}")]
    SerializeError(String),

    #[error("Authority url {url} is unusable: {reason}")]
    InvalidServerUrl { url: String, reason: String },

    #[error("Reconnect delays must be comma-separated milliseconds: {0}")]
    InvalidReconnectDelays(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}
