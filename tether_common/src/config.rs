//! Target connection configuration.
//!
//! Host tooling loads a small TOML file describing how to reach a target's
//! driver ports:
//!
//! ```toml
//! host = "127.0.0.1"
//! command_port = 5010
//! callback_port = 5011
//! start_callback_server = true
//! conn_timeout_secs = 30
//! log_level = "debug"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// How to reach one target device's driver ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target hostname or address (usually localhost behind port forwarding).
    #[serde(default = "default_host")]
    pub host: String,

    /// Host-side port of the command-response session.
    pub command_port: u16,

    /// Host-side port drivers deliver asynchronous callbacks to.
    #[serde(default)]
    pub callback_port: Option<u16>,

    /// Start the callback listener as part of registry construction.
    #[serde(default)]
    pub start_callback_server: bool,

    /// TCP connection timeout applied to shell sessions, in seconds.
    #[serde(default)]
    pub conn_timeout_secs: Option<u64>,

    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,
}

impl TargetConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: TargetConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;
        Self::from_toml(&content)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `command_port` or `callback_port` is zero
    /// - `start_callback_server` is set without a `callback_port`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_port == 0 {
            return Err(ConfigError::ValidationError(
                "command_port cannot be zero".to_string(),
            ));
        }
        if self.callback_port == Some(0) {
            return Err(ConfigError::ValidationError(
                "callback_port cannot be zero".to_string(),
            ));
        }
        if self.start_callback_server && self.callback_port.is_none() {
            return Err(ConfigError::ValidationError(
                "start_callback_server requires a callback_port".to_string(),
            ));
        }
        Ok(())
    }
}
