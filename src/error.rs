use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while polling a monitoring producer
///
/// Every variant is recovered locally by the collector and turned into a
/// degraded snapshot; none of them is fatal to the process.
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Producer unavailable: {0}")]
    Unavailable(String),

    #[error("Producer '{producer}' timed out after {timeout:?}")]
    Timeout { producer: String, timeout: Duration },

    #[error("Producer command failed: {0}")]
    CommandFailed(String),

    #[error("Failed to parse producer output: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur while training or using a statistical model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Insufficient data for '{metric}': need {needed} samples, have {have}")]
    InsufficientData {
        metric: String,
        needed: usize,
        have: usize,
    },
}

/// Errors that can occur while executing an automated response action
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Errors that can occur while reading or writing reports, incidents or history
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
