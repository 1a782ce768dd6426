// ── Runtime coordinator configuration ──
//
// Describes *how* to reach the vendor and how aggressively to poll.
// Built by the config crate or CLI and handed in -- core never reads
// config files.

use std::time::Duration;

use url::Url;

use carlink_api::auth::AuthEndpoints;
use carlink_api::stream::ReconnectConfig;

/// Configuration for one coordinator (one vendor account).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// OAuth client identifier issued by the vendor.
    pub client_id: String,

    /// Telemetry REST base URL.
    pub api_base_url: Url,

    /// Push-stream endpoint.
    pub stream_url: Url,

    /// Auth service endpoints.
    pub auth_endpoints: AuthEndpoints,

    /// Fixed poll cadence. Default: 30 minutes.
    pub poll_interval: Duration,

    /// REST call ceiling per rolling 24-hour window. Default: 50.
    pub call_ceiling: usize,

    /// Refresh the access token this far before its expiry.
    pub refresh_margin: Duration,

    /// Stream reconnect backoff bounds.
    pub reconnect: ReconnectConfig,

    /// HTTP request timeout.
    pub timeout: Duration,
}

impl Default for CoordinatorConfig {
    // Literal URL cannot fail to parse.
    #[allow(clippy::unwrap_used)]
    fn default() -> Self {
        Self {
            client_id: String::new(),
            api_base_url: carlink_api::rest::TelemetryClient::default_base_url(),
            stream_url: "wss://customer.streaming-cardata.bmwgroup.com:9000/telemetry"
                .parse()
                .unwrap(),
            auth_endpoints: AuthEndpoints::default(),
            poll_interval: Duration::from_secs(1_800),
            call_ceiling: 50,
            refresh_margin: Duration::from_secs(300),
            reconnect: ReconnectConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl CoordinatorConfig {
    /// The rolling window the call ceiling applies to.
    pub const BUDGET_WINDOW: Duration = Duration::from_secs(86_400);
}
