// ── Credential Manager ──
//
// Owns the token lifecycle: device-authorization flow, proactive
// refresh, and the terminal re-authorization state. Concurrent callers
// needing a token during a refresh coalesce onto a single network
// call: the async mutex is held across the refresh request, and the
// attempt's outcome (success or failure) is shared with every caller
// that queued behind it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use carlink_api::auth::{AuthClient, DeviceAuthorization, TokenSet};
use carlink_api::stream::StreamCredentials;

use crate::error::CoreError;

/// Ceiling on the device-flow polling interval after `slow_down` nudges.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Observable credential state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No credentials; the device flow has never completed.
    NotAuthorized,
    /// A device-authorization flow is in progress.
    Pending,
    /// Valid credentials on hand (possibly nearing expiry).
    Authorized,
    /// The refresh token was rejected. Terminal until a new device
    /// flow completes; every token request fails fast in this state.
    Expired,
}

/// Guarded token state. `last_failure` records the outcome of the most
/// recent failed refresh so callers that queued behind that attempt can
/// adopt it instead of issuing their own refresh.
#[derive(Default)]
struct TokenState {
    tokens: Option<TokenSet>,
    last_failure: Option<FailedRefresh>,
}

struct FailedRefresh {
    epoch: u64,
    error: Arc<carlink_api::Error>,
}

/// Manages the two-tier credential: access token for REST, identity
/// token for the push stream, refresh token to renew both.
pub struct CredentialManager {
    auth: AuthClient,
    tokens: Mutex<TokenState>,
    /// Count of concluded refresh attempts. Read before queueing on the
    /// mutex; an attempt that concludes while a caller waits bumps this
    /// past the caller's reading.
    refresh_epoch: AtomicU64,
    refresh_margin: chrono::Duration,
    state_tx: watch::Sender<AuthState>,
    stream_tx: watch::Sender<Option<StreamCredentials>>,
}

impl CredentialManager {
    pub fn new(auth: AuthClient, refresh_margin: Duration) -> Self {
        let (state_tx, _) = watch::channel(AuthState::NotAuthorized);
        let (stream_tx, _) = watch::channel(None);
        Self {
            auth,
            tokens: Mutex::new(TokenState::default()),
            refresh_epoch: AtomicU64::new(0),
            refresh_margin: chrono::Duration::from_std(refresh_margin)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            state_tx,
            stream_tx,
        }
    }

    /// Current state, for fail-fast checks and status displays.
    pub fn state(&self) -> AuthState {
        *self.state_tx.borrow()
    }

    /// Watch channel for state transitions.
    pub fn state_watch(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    /// Watch channel carrying the latest stream credentials. The stream
    /// task redials whenever a new value is published.
    pub fn stream_credentials(&self) -> watch::Receiver<Option<StreamCredentials>> {
        self.stream_tx.subscribe()
    }

    /// Install a credential set (restored from storage, or freshly
    /// granted) and leave the Expired state if we were in it.
    ///
    /// The tokens are stored before the state is published, both under
    /// one lock acquisition, so a concurrent token request never
    /// observes the Authorized state without tokens behind it.
    pub async fn install(&self, tokens: TokenSet) {
        let mut guard = self.tokens.lock().await;
        guard.last_failure = None;
        let tokens = guard.tokens.insert(tokens);
        self.publish(tokens);
    }

    /// Snapshot of the current tokens, for persistence after rotation.
    pub async fn tokens_snapshot(&self) -> Option<TokenSet> {
        self.tokens.lock().await.tokens.clone()
    }

    /// Start a device-authorization flow. The returned struct carries
    /// the verification URL and user code to present out-of-band.
    pub async fn begin_device_authorization(&self) -> Result<DeviceAuthorization, CoreError> {
        let authz = self.auth.request_device_code().await?;
        self.state_tx.send_replace(AuthState::Pending);
        info!(
            verification_uri = %authz.verification_uri,
            user_code = %authz.user_code,
            "device authorization started"
        );
        Ok(authz)
    }

    /// Poll the token endpoint until the user completes authorization,
    /// the device code expires, or a terminal error occurs.
    ///
    /// Respects the server-specified interval; `slow_down` responses
    /// widen it (capped). Transient auth-service faults keep polling.
    pub async fn wait_for_authorization(
        &self,
        authz: &DeviceAuthorization,
    ) -> Result<(), CoreError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(authz.expires_in);
        let mut interval = Duration::from_secs(authz.interval.max(1));

        loop {
            if tokio::time::Instant::now() >= deadline {
                self.state_tx.send_replace(AuthState::NotAuthorized);
                return Err(CoreError::AuthorizationTimedOut);
            }

            tokio::time::sleep(interval).await;

            match self.auth.poll_device_token(&authz.device_code).await {
                Ok(tokens) => {
                    info!(account = %tokens.account_id, "device authorization granted");
                    self.install(tokens).await;
                    return Ok(());
                }
                Err(carlink_api::Error::AuthorizationPending) => {}
                Err(carlink_api::Error::SlowDown) => {
                    interval = (interval + Duration::from_secs(2)).min(MAX_POLL_INTERVAL);
                    warn!(interval_secs = interval.as_secs(), "server asked to slow down");
                }
                Err(carlink_api::Error::AuthorizationTimedOut) => {
                    self.state_tx.send_replace(AuthState::NotAuthorized);
                    return Err(CoreError::AuthorizationTimedOut);
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "transient fault while polling for authorization");
                }
                Err(e) => {
                    self.state_tx.send_replace(AuthState::NotAuthorized);
                    return Err(e.into());
                }
            }
        }
    }

    /// A valid access token, refreshing first if it is expired or
    /// within the refresh margin of expiry.
    ///
    /// Concurrent callers during a refresh coalesce: the mutex is held
    /// across the network call, so exactly one refresh happens and the
    /// waiters adopt its outcome -- the rotated token on success, the
    /// same error on failure. In the Expired state this fails fast
    /// without touching the network.
    pub async fn access_token(&self) -> Result<SecretString, CoreError> {
        if self.state() == AuthState::Expired {
            return Err(CoreError::ReauthorizationRequired);
        }

        let queued_at = self.refresh_epoch.load(Ordering::Acquire);
        let mut guard = self.tokens.lock().await;

        // A waiter may arrive after the holder hit a terminal rejection.
        if self.state() == AuthState::Expired {
            return Err(CoreError::ReauthorizationRequired);
        }

        let state = &mut *guard;
        let tokens = state.tokens.as_mut().ok_or(CoreError::NotAuthorized)?;
        if !tokens.expires_within(self.refresh_margin) {
            return Ok(tokens.access_token.clone());
        }

        // An attempt that concluded while this caller was queued covers
        // it too; a second refresh would spend the single-use token.
        if let Some(failed) = &state.last_failure {
            if failed.epoch > queued_at {
                return Err(CoreError::Refresh(failed.error.clone()));
            }
        }

        let result = self.auth.refresh(&tokens.refresh_token).await;
        let epoch = self.refresh_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        match result {
            Ok(fresh) => {
                info!(expires_at = %fresh.expires_at, "access token refreshed");
                state.last_failure = None;
                let token = fresh.access_token.clone();
                self.publish(&fresh);
                state.tokens = Some(fresh);
                Ok(token)
            }
            Err(carlink_api::Error::ReauthorizationRequired) => {
                warn!("refresh token rejected, re-authorization required");
                self.state_tx.send_replace(AuthState::Expired);
                Err(CoreError::ReauthorizationRequired)
            }
            Err(e) => {
                let error = Arc::new(e);
                state.last_failure = Some(FailedRefresh {
                    epoch,
                    error: error.clone(),
                });
                Err(CoreError::Refresh(error))
            }
        }
    }

    fn publish(&self, tokens: &TokenSet) {
        self.state_tx.send_replace(AuthState::Authorized);
        if !tokens.account_id.is_empty() {
            self.stream_tx.send_replace(Some(StreamCredentials {
                account_id: tokens.account_id.clone(),
                token: tokens.id_token.expose_secret().to_owned(),
            }));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use carlink_api::auth::AuthEndpoints;

    fn manager_for(server: &MockServer) -> CredentialManager {
        let base: url::Url = server.uri().parse().expect("mock server url");
        let endpoints = AuthEndpoints::with_base(&base).expect("endpoints");
        let auth = AuthClient::new(reqwest::Client::new(), "client-1", endpoints);
        CredentialManager::new(auth, Duration::from_secs(300))
    }

    fn token_set(expires_in_secs: i64) -> TokenSet {
        TokenSet {
            access_token: SecretString::from("at-old".to_string()),
            refresh_token: SecretString::from("rt-1".to_string()),
            id_token: SecretString::from("idt-1".to_string()),
            account_id: "acct-1".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        }
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_network() {
        let server = MockServer::start().await;
        let manager = manager_for(&server);
        manager.install(token_set(3_600)).await;

        let token = manager.access_token().await.expect("token");
        assert_eq!(token.expose_secret(), "at-old");
        assert_eq!(manager.state(), AuthState::Authorized);
    }

    #[tokio::test]
    async fn concurrent_callers_coalesce_onto_one_refresh() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/gcdm/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-new",
                "refresh_token": "rt-2",
                "id_token": "idt-2",
                "expires_in": 3599,
                "gcid": "acct-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = std::sync::Arc::new(manager_for(&server));
        manager.install(token_set(10)).await; // inside the 300s margin

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.access_token().await }));
        }
        for handle in handles {
            let token = handle.await.expect("join").expect("token");
            assert_eq!(token.expose_secret(), "at-new");
        }
    }

    #[tokio::test]
    async fn waiters_share_a_failed_refresh_instead_of_retrying() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/gcdm/oauth/token"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .expect(1)
            .mount(&server)
            .await;

        let manager = Arc::new(manager_for(&server));
        manager.install(token_set(10)).await; // inside the 300s margin

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.access_token().await }));
        }
        for handle in handles {
            let err = handle.await.expect("join").expect_err("refresh failed");
            assert!(matches!(err, CoreError::Refresh(_)));
        }
        server.verify().await;

        // The failure does not poison later attempts: a caller arriving
        // after the attempt concluded refreshes on its own.
        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/gcdm/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-new",
                "refresh_token": "rt-2",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = manager.access_token().await.expect("token");
        assert_eq!(token.expose_secret(), "at-new");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn authorized_state_is_never_visible_without_tokens() {
        let server = MockServer::start().await;
        let manager = Arc::new(manager_for(&server));
        let mut state = manager.state_watch();

        // Once a subscriber observes Authorized, a token request must
        // succeed -- install stores the tokens under the same lock
        // acquisition that publishes the state.
        let waiter = tokio::spawn({
            let manager = manager.clone();
            async move {
                state
                    .wait_for(|s| *s == AuthState::Authorized)
                    .await
                    .expect("state channel open");
                manager.access_token().await
            }
        });

        manager.install(token_set(3_600)).await;

        let token = waiter.await.expect("join").expect("token after install");
        assert_eq!(token.expose_secret(), "at-old");
    }

    #[tokio::test]
    async fn rejected_refresh_enters_expired_and_fails_fast() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/gcdm/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server);
        manager.install(token_set(10)).await;

        let err = manager.access_token().await.expect_err("terminal");
        assert!(matches!(err, CoreError::ReauthorizationRequired));
        assert_eq!(manager.state(), AuthState::Expired);

        // Second call must not hit the network (expect(1) above).
        let err = manager.access_token().await.expect_err("fail fast");
        assert!(matches!(err, CoreError::ReauthorizationRequired));
    }

    #[tokio::test]
    async fn no_tokens_means_not_authorized() {
        let server = MockServer::start().await;
        let manager = manager_for(&server);

        let err = manager.access_token().await.expect_err("no creds");
        assert!(matches!(err, CoreError::NotAuthorized));
    }

    #[tokio::test]
    async fn install_publishes_stream_credentials() {
        let server = MockServer::start().await;
        let manager = manager_for(&server);
        let mut stream_rx = manager.stream_credentials();

        assert!(stream_rx.borrow().is_none());
        manager.install(token_set(3_600)).await;

        let creds = stream_rx
            .borrow_and_update()
            .clone()
            .expect("stream credentials published");
        assert_eq!(creds.account_id, "acct-1");
        assert_eq!(creds.token, "idt-1");
    }
}
