//! OAuth 2.0 device-authorization flow and token lifecycle.
//!
//! The vendor grants a two-tier credential: a short-lived access token
//! for the REST API, a longer-lived refresh token, and an identity
//! token used by the push stream. This module is stateless wire-level
//! plumbing -- the refresh/authorization *state machine* lives in
//! `carlink-core`'s Credential Manager.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, error};
use url::Url;

use crate::error::Error;

/// Scopes requested during device authorization.
const OAUTH_SCOPES: &str = "authenticate_user openid cardata:api:read cardata:streaming:read";

/// Fallbacks for fields the auth service may omit.
const DEFAULT_EXPIRES_IN: u64 = 300;
const DEFAULT_INTERVAL: u64 = 5;
const DEFAULT_TOKEN_LIFETIME: i64 = 3599;

// ── Endpoints ────────────────────────────────────────────────────────

/// Auth service endpoints. Overridable so tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub device_code_url: Url,
    pub token_url: Url,
}

impl Default for AuthEndpoints {
    // Literal URLs cannot fail to parse.
    #[allow(clippy::unwrap_used)]
    fn default() -> Self {
        Self {
            device_code_url: "https://customer.bmwgroup.com/gcdm/oauth/device/code"
                .parse()
                .unwrap(),
            token_url: "https://customer.bmwgroup.com/gcdm/oauth/token".parse().unwrap(),
        }
    }
}

impl AuthEndpoints {
    /// Endpoints rooted at an arbitrary base URL (used by tests).
    pub fn with_base(base: &Url) -> Result<Self, Error> {
        Ok(Self {
            device_code_url: base.join("/gcdm/oauth/device/code")?,
            token_url: base.join("/gcdm/oauth/token")?,
        })
    }
}

// ── Wire types ───────────────────────────────────────────────────────

/// Response from the device code endpoint: everything the user needs to
/// complete authorization out-of-band, plus our polling parameters.
#[derive(Debug, Clone)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    /// Seconds until the device code expires.
    pub expires_in: u64,
    /// Server-specified polling interval in seconds.
    pub interval: u64,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeWire {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenWire {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    /// Account identifier; doubles as the push-stream username.
    #[serde(default)]
    gcid: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OAuthErrorWire {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// A complete credential set from the token endpoint.
///
/// Owned by the Credential Manager in `carlink-core`; everything here
/// is secret material except the account id and expiry.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Identity token used to authenticate the push-stream subscription.
    pub id_token: SecretString,
    /// Account identifier (push-stream username, diagnostics label).
    pub account_id: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    fn from_wire(wire: TokenWire, previous_refresh: Option<&SecretString>) -> Self {
        let refresh_token = wire
            .refresh_token
            .map(SecretString::from)
            .or_else(|| previous_refresh.cloned())
            .unwrap_or_else(|| SecretString::from(String::new()));

        Self {
            access_token: SecretString::from(wire.access_token),
            refresh_token,
            id_token: SecretString::from(wire.id_token.unwrap_or_default()),
            account_id: wire.gcid.unwrap_or_default(),
            expires_at: Utc::now()
                + Duration::seconds(wire.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME)),
        }
    }

    /// Whether the access token is expired or within `margin` of expiry.
    pub fn expires_within(&self, margin: chrono::Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Wire-level client for the vendor's OAuth device flow.
pub struct AuthClient {
    http: reqwest::Client,
    client_id: String,
    endpoints: AuthEndpoints,
}

impl AuthClient {
    pub fn new(http: reqwest::Client, client_id: impl Into<String>, endpoints: AuthEndpoints) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            endpoints,
        }
    }

    /// Request a device code for user authorization.
    ///
    /// Returns the user-facing verification URL and code, plus the
    /// polling interval and expiry for the authorization request.
    pub async fn request_device_code(&self) -> Result<DeviceAuthorization, Error> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("response_type", "device_code"),
            ("scope", OAUTH_SCOPES),
        ];

        let resp = self
            .http
            .post(self.endpoints.device_code_url.clone())
            .form(&params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::AuthService {
                status: status.as_u16(),
                message: truncate(&body),
            });
        }

        let body = resp.text().await?;
        let wire: DeviceCodeWire =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: truncate(&body),
            })?;

        debug!(user_code = %wire.user_code, "device code issued");

        Ok(DeviceAuthorization {
            verification_uri_complete: wire
                .verification_uri_complete
                .unwrap_or_else(|| wire.verification_uri.clone()),
            device_code: wire.device_code,
            user_code: wire.user_code,
            verification_uri: wire.verification_uri,
            expires_in: wire.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
            interval: wire.interval.unwrap_or(DEFAULT_INTERVAL),
        })
    }

    /// Poll the token endpoint once for the device-flow grant.
    ///
    /// Returns [`Error::AuthorizationPending`] while the user has not
    /// finished, [`Error::SlowDown`] if polling too fast, and
    /// [`Error::AuthorizationTimedOut`] once the device code expired.
    pub async fn poll_device_token(&self, device_code: &str) -> Result<TokenSet, Error> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ("device_code", device_code),
        ];

        let resp = self
            .http
            .post(self.endpoints.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if status.is_success() {
            let wire: TokenWire =
                serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: truncate(&body),
                })?;
            return Ok(TokenSet::from_wire(wire, None));
        }

        let err: OAuthErrorWire = serde_json::from_str(&body).unwrap_or_default();

        // The auth service signals "pending" either by error code or a 403.
        if err.error == "authorization_pending" || status.as_u16() == 403 {
            return Err(Error::AuthorizationPending);
        }
        if err.error == "slow_down" {
            return Err(Error::SlowDown);
        }
        if err.error == "expired_token" || status.as_u16() == 401 {
            return Err(Error::AuthorizationTimedOut);
        }

        Err(Error::AuthService {
            status: status.as_u16(),
            message: format!("{} {}", err.error, err.error_description),
        })
    }

    /// Refresh the access token using a refresh token.
    ///
    /// An `invalid_grant` (or other 4xx rejection) is terminal: the
    /// refresh token is dead and only a new device flow can recover.
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenSet, Error> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
        ];

        let resp = self
            .http
            .post(self.endpoints.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if status.is_success() {
            let wire: TokenWire =
                serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: truncate(&body),
                })?;
            return Ok(TokenSet::from_wire(wire, Some(refresh_token)));
        }

        if status.is_server_error() {
            return Err(Error::AuthService {
                status: status.as_u16(),
                message: truncate(&body),
            });
        }

        let err: OAuthErrorWire = serde_json::from_str(&body).unwrap_or_default();
        error!(status = status.as_u16(), error = %err.error, "token refresh rejected");
        Err(Error::ReauthorizationRequired)
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(500).collect()
}

// ── Tests ────────────────────────────────────────────────────────────
