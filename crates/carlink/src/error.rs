//! CLI error types with exit codes.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable follow-up hints.

use thiserror::Error;

use carlink_config::ConfigError;
use carlink_core::CoreError;

/// Exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Not authorized -- run `carlink login` first")]
    NotAuthorized,

    #[error("Stored credentials are no longer valid -- run `carlink login` again")]
    ReauthorizationRequired,

    #[error("Device authorization timed out -- run `carlink login` to retry")]
    AuthorizationTimedOut,

    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("{0}")]
    Config(ConfigError),

    #[error("{0}")]
    Core(CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotAuthorized | Self::ReauthorizationRequired | Self::AuthorizationTimedOut => {
                exit_code::AUTH
            }
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotAuthorized => Self::NotAuthorized,
            CoreError::ReauthorizationRequired => Self::ReauthorizationRequired,
            CoreError::AuthorizationTimedOut => Self::AuthorizationTimedOut,
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            other => Self::Core(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoStoredTokens => Self::NotAuthorized,
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}
