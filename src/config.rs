//! Configuration management for windowlimit.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, WindowLimitError};
use crate::ratelimit::WindowConfig;

/// Prefix for environment variable overrides, e.g. `WINDOWLIMIT__LIMITER__MAX_REQUESTS`.
pub const ENV_PREFIX: &str = "WINDOWLIMIT";

/// Main configuration for a protected operation's limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowLimitConfig {
    /// Quota and key derivation settings
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Shared counter store settings
    #[serde(default)]
    pub redis: RedisConfig,
}

/// Quota and key derivation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Length of one fixed window in seconds
    #[serde(default = "default_window_size_secs")]
    pub window_size_secs: u64,

    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Give every client address its own bucket under the same identity
    #[serde(default)]
    pub use_client_address: bool,

    /// Prefix prepended to every counter key
    #[serde(default = "default_key_namespace")]
    pub key_namespace: String,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_size_secs: default_window_size_secs(),
            max_requests: default_max_requests(),
            use_client_address: false,
            key_namespace: default_key_namespace(),
        }
    }
}

impl LimiterConfig {
    /// Validate the quota settings into a [`WindowConfig`].
    pub fn window(&self) -> Result<WindowConfig> {
        WindowConfig::new(self.window_size_secs, self.max_requests)
    }
}

fn default_window_size_secs() -> u64 {
    60
}

fn default_max_requests() -> u64 {
    100
}

fn default_key_namespace() -> String {
    "ratelimit:".to_string()
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Upper bound on one increment round trip, connection setup included
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl RedisConfig {
    /// Response timeout as a [`Duration`].
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_response_timeout_ms() -> u64 {
    250
}

impl WindowLimitConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WindowLimitError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional file, then apply `WINDOWLIMIT__*`
    /// environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env_prefix(path, ENV_PREFIX)
    }

    fn load_with_env_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading rate limiter configuration");
            builder = builder.add_source(::config::File::from(path));
        }

        let config: WindowLimitConfig = builder
            .add_source(
                ::config::Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
