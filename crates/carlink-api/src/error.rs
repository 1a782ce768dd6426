use thiserror::Error;

/// Top-level error type for the `carlink-api` crate.
///
/// Covers every failure mode across all API surfaces: the OAuth device
/// flow, token refresh, the telemetry REST API, and the push stream.
/// `carlink-core` maps these into coordinator-level conditions.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authorization ───────────────────────────────────────────────
    /// Auth service returned a failure that is neither pending nor terminal
    /// (malformed request, 5xx, unexpected error code).
    #[error("Auth service error (HTTP {status}): {message}")]
    AuthService { status: u16, message: String },

    /// The user has not yet completed the device authorization.
    #[error("Authorization pending -- user has not completed the flow")]
    AuthorizationPending,

    /// The auth service asked us to poll less frequently.
    #[error("Auth service requested slower polling")]
    SlowDown,

    /// The device code expired before the user authorized.
    #[error("Device code expired before the user completed authorization")]
    AuthorizationTimedOut,

    /// The refresh token was rejected (invalid_grant). A new device
    /// authorization flow is required.
    #[error("Refresh token rejected -- re-authorization required")]
    ReauthorizationRequired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Telemetry REST API ──────────────────────────────────────────
    /// The access token was rejected by the API (HTTP 401).
    #[error("Unauthorized -- access token rejected by the API")]
    Unauthorized,

    /// Rate limited by the vendor's own server-side limiter (HTTP 429).
    /// Distinct from the client-side rolling budget in `carlink-core`.
    #[error("Rate limited by vendor -- retry after {retry_after_secs}s")]
    RateLimitedUpstream { retry_after_secs: u64 },

    /// Any other non-2xx response from the telemetry API.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Push stream ─────────────────────────────────────────────────
    /// Stream connection or subscription failed.
    #[error("Stream connection failed: {0}")]
    StreamConnect(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying on
    /// the next scheduled attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::AuthService { status, .. } => *status >= 500,
            Self::RateLimitedUpstream { .. } | Self::StreamConnect(_) | Self::SlowDown => true,
            _ => false,
        }
    }

    /// Returns `true` if this error means the credential set is dead
    /// and only a new device authorization flow can resolve it.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::ReauthorizationRequired)
    }
}
