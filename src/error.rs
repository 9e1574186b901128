//! Error types for the rate limiter.

use thiserror::Error;

/// Main error type for windowlimit operations.
#[derive(Error, Debug)]
pub enum WindowLimitError {
    /// Rejected settings, raised only while constructing a limiter or store
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The shared counter store could not be reached
    #[error("Counter store unavailable: {0}")]
    BackendUnavailable(String),

    /// The atomic increment-and-expire primitive is missing on the store
    #[error("Counter store protocol error: {0}")]
    BackendProtocol(String),

    /// Any other counter store failure
    #[error("Counter store error: {0}")]
    Backend(String),

    /// Settings file or environment could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for WindowLimitError {
    fn from(err: redis::RedisError) -> Self {
        if err.kind() == redis::ErrorKind::NoScriptError {
            WindowLimitError::BackendProtocol(err.to_string())
        } else if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
        {
            WindowLimitError::BackendUnavailable(err.to_string())
        } else {
            WindowLimitError::Backend(err.to_string())
        }
    }
}

impl From<::config::ConfigError> for WindowLimitError {
    fn from(err: ::config::ConfigError) -> Self {
        WindowLimitError::Config(err.to_string())
    }
}

/// Result type alias for windowlimit operations.
pub type Result<T> = std::result::Result<T, WindowLimitError>;
