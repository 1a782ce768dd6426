// ── Core error types ──
//
// Coordinator-facing errors. These are NOT wire-specific -- consumers
// never see HTTP status codes directly. The `From<carlink_api::Error>`
// impl translates transport-layer errors into coordinator conditions.
//
// Deliberately absent: a "rate budget exhausted" variant. A denied
// reservation is a planned skip, not a failure (see `budget`).

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Standing conditions ──────────────────────────────────────────
    /// The refresh token is dead. Every networked operation fails fast
    /// with this until a new device-authorization flow succeeds.
    #[error("Re-authorization required: refresh token invalid or expired")]
    ReauthorizationRequired,

    /// The device code expired before the user completed the flow.
    #[error("Device authorization timed out -- restart the flow")]
    AuthorizationTimedOut,

    /// No credentials at all: the device flow has never completed.
    #[error("Not authorized -- run the device authorization flow first")]
    NotAuthorized,

    // ── Transient faults ─────────────────────────────────────────────
    /// Transient failure talking to the auth service. Retried on the
    /// next scheduled attempt.
    #[error("Auth service error: {message}")]
    AuthService { message: String },

    /// Transient failure talking to the telemetry API.
    #[error("API error: {message}")]
    Api { message: String },

    /// A token refresh attempt failed. Every caller that was waiting on
    /// the same attempt receives this same outcome; retried on the next
    /// scheduled attempt.
    #[error("Token refresh failed: {0}")]
    Refresh(std::sync::Arc<carlink_api::Error>),

    /// Malformed payload from the vendor; the offending message was
    /// dropped, other vehicles are unaffected.
    #[error("Decode error: {message}")]
    Decode { message: String },

    // ── Local errors ─────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Coordinator is shut down")]
    Shutdown,
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<carlink_api::Error> for CoreError {
    fn from(err: carlink_api::Error) -> Self {
        match err {
            carlink_api::Error::ReauthorizationRequired => Self::ReauthorizationRequired,
            carlink_api::Error::AuthorizationTimedOut => Self::AuthorizationTimedOut,
            carlink_api::Error::AuthService { status, message } => Self::AuthService {
                message: format!("HTTP {status}: {message}"),
            },
            carlink_api::Error::AuthorizationPending | carlink_api::Error::SlowDown => {
                // Flow-control signals; callers handle these before
                // converting. Reaching here means a logic error upstream,
                // surfaced as a transient auth fault.
                Self::AuthService {
                    message: err.to_string(),
                }
            }
            carlink_api::Error::Unauthorized => Self::Api {
                message: "access token rejected".into(),
            },
            carlink_api::Error::Deserialization { message, .. } => Self::Decode { message },
            carlink_api::Error::InvalidUrl(e) => Self::Config {
                message: format!("invalid URL: {e}"),
            },
            other => Self::Api {
                message: other.to_string(),
            },
        }
    }
}
