//! Session configuration.

use std::time::Duration;

use runbox_core::DEFAULT_TIMEOUT_MS;

/// Environment variable holding the runner endpoint.
pub const ENV_URL: &str = "RUNBOX_WS_URL";
/// Environment variable holding the access token.
pub const ENV_TOKEN: &str = "RUNBOX_WS_TOKEN";
/// Environment variable holding the default job timeout in milliseconds.
pub const ENV_TIMEOUT_MS: &str = "RUNBOX_TIMEOUT_MS";

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Where and how a session connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Runner endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// Access token sent in the handshake.
    pub token: Option<String>,
    /// Timeout sent with `start_job` when a run request does not carry one.
    pub default_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration with the default job timeout.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Override the default job timeout.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Read the configuration from the process environment.
    ///
    /// # Errors
    /// Returns error if the endpoint is missing or the timeout is not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`.
    ///
    /// # Errors
    /// Returns error if the endpoint is missing or the timeout is not a number.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let endpoint = non_empty(ENV_URL).ok_or(ConfigError::Missing(ENV_URL))?;
        let mut config = Self::new(endpoint, non_empty(ENV_TOKEN));

        if let Some(raw) = non_empty(ENV_TIMEOUT_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: ENV_TIMEOUT_MS,
                value: raw.clone(),
            })?;
            config.default_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// Default timeout in whole milliseconds, as sent on the wire.
    #[must_use]
    pub fn default_timeout_ms(&self) -> u64 {
        u64::try_from(self.default_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}
