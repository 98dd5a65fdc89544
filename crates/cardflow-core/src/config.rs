//! Session configuration.
//!
//! [`Config`] is built once per payment session and never changes afterwards.
//! The transaction engine only reads the [`PolicyConfig`] flags and the reader
//! timeouts; the environment selector is passed through to backend clients.
//!
//! # Examples
//!
//! ```
//! use cardflow_core::{Config, Environment};
//!
//! let config = Config::new("171482", Environment::Stage)
//!     .with_restart_after_success(true)
//!     .with_stop_reader_after_transaction(false);
//!
//! assert!(config.policy.restart_after_success);
//! assert!(!config.policy.stop_reader_after_transaction);
//! assert!(config.validate().is_ok());
//! ```

use crate::{Result, constants::DEFAULT_READER_COMMAND_TIMEOUT_MS, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Backend environment selector, opaque to the transaction engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Staging backend.
    Stage,

    /// Production backend.
    Production,

    /// Custom backend base URL.
    Custom(String),
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Stage => write!(f, "stage"),
            Environment::Production => write!(f, "production"),
            Environment::Custom(url) => write!(f, "custom({})", url),
        }
    }
}

/// Restart and stop policy applied after every terminal outcome.
///
/// Evaluated in this order:
/// 1. success and `restart_after_success` → re-arm
/// 2. reader error (not a cancel) and `restart_after_other_errors` → re-arm
/// 3. backend error, `restart_after_other_errors` and `restart_after_backend_errors` → re-arm
/// 4. `stop_reader_after_transaction` → emit `STOPPED` and release the reader
/// 5. otherwise the transaction ends with the reader still connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Re-arm for another card after a successful transaction.
    pub restart_after_success: bool,

    /// Re-arm for another card after a reader-level error.
    pub restart_after_other_errors: bool,

    /// Treat backend failures as eligible for `restart_after_other_errors`.
    pub restart_after_backend_errors: bool,

    /// Emit `STOPPED` and release the reader when no restart applies.
    pub stop_reader_after_transaction: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            restart_after_success: false,
            restart_after_other_errors: false,
            restart_after_backend_errors: false,
            stop_reader_after_transaction: true,
        }
    }
}

/// Payment session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Merchant application client id.
    pub client_id: String,

    /// Backend environment.
    pub environment: Environment,

    /// Restart and stop policy.
    pub policy: PolicyConfig,

    /// Timeout for a single card reader command, in milliseconds.
    pub reader_command_timeout_ms: u64,

    /// Timeout for a card to be presented, in milliseconds. `None` waits forever.
    pub card_wait_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            environment: Environment::Stage,
            policy: PolicyConfig::default(),
            reader_command_timeout_ms: DEFAULT_READER_COMMAND_TIMEOUT_MS,
            card_wait_timeout_ms: None,
        }
    }
}

impl Config {
    /// Create a configuration with default policy.
    pub fn new(client_id: impl Into<String>, environment: Environment) -> Self {
        Self {
            client_id: client_id.into(),
            environment,
            ..Self::default()
        }
    }

    /// Set `restart_after_success`.
    pub fn with_restart_after_success(mut self, enabled: bool) -> Self {
        self.policy.restart_after_success = enabled;
        self
    }

    /// Set `restart_after_other_errors`.
    pub fn with_restart_after_other_errors(mut self, enabled: bool) -> Self {
        self.policy.restart_after_other_errors = enabled;
        self
    }

    /// Set `restart_after_backend_errors`.
    pub fn with_restart_after_backend_errors(mut self, enabled: bool) -> Self {
        self.policy.restart_after_backend_errors = enabled;
        self
    }

    /// Set `stop_reader_after_transaction`.
    pub fn with_stop_reader_after_transaction(mut self, enabled: bool) -> Self {
        self.policy.stop_reader_after_transaction = enabled;
        self
    }

    /// Replace the whole policy.
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Set the per-command reader timeout.
    pub fn with_reader_command_timeout(mut self, timeout: Duration) -> Self {
        self.reader_command_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the card presentment timeout.
    pub fn with_card_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.card_wait_timeout_ms = timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Per-command reader timeout as a `Duration`.
    pub fn reader_command_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_command_timeout_ms)
    }

    /// Card presentment timeout as a `Duration`.
    pub fn card_wait_timeout(&self) -> Option<Duration> {
        self.card_wait_timeout_ms.map(Duration::from_millis)
    }

    /// Check the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the client id is empty or a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("client_id must not be empty".to_string()));
        }

        if self.reader_command_timeout_ms == 0 {
            return Err(Error::Config(
                "reader_command_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.card_wait_timeout_ms == Some(0) {
            return Err(Error::Config(
                "card_wait_timeout_ms must be greater than zero when set".to_string(),
            ));
        }

        if let Environment::Custom(url) = &self.environment
            && url.trim().is_empty()
        {
            return Err(Error::Config("custom environment URL is empty".to_string()));
        }

        Ok(())
    }
}
