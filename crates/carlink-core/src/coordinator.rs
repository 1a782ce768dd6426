// ── Coordinator ──
//
// Full lifecycle management for one vendor account: credential
// handling, vehicle discovery, budgeted polling, the push-stream
// listener, and the merged state store. Cheaply cloneable via
// `Arc<CoordinatorInner>`; background tasks hold clones and stop on
// the shared cancellation token.

use std::sync::Arc;
use std::time::Instant;

use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use carlink_api::auth::{AuthClient, TokenSet};
use carlink_api::rest::{
    ContainerSpec, TelemetryClient, VehicleInfo, DEFAULT_CONTAINER_NAME, DEFAULT_CONTAINER_PURPOSE,
};
use carlink_api::stream::{StreamHandle, TelemetryFrame};
use carlink_api::transport::TransportConfig;

use crate::budget::{RateBudget, Reservation};
use crate::config::CoordinatorConfig;
use crate::credentials::{AuthState, CredentialManager};
use crate::diagnostics::{
    auth_state_name, BudgetDiagnostics, Diagnostics, TokenDiagnostics, VehicleDiagnostics,
};
use crate::discovery::{DiscoveryRegistry, KNOWN_KEYS};
use crate::error::CoreError;
use crate::model::{Source, TelemetryValue, Vin};
use crate::store::StateStore;

/// The main entry point for consumers.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    credentials: CredentialManager,
    api: TelemetryClient,
    budget: RateBudget,
    registry: DiscoveryRegistry,
    store: StateStore,
    container_id: Mutex<Option<String>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Create a coordinator from configuration. Does NOT touch the
    /// network -- install credentials, then call
    /// [`start()`](Self::start).
    pub fn new(config: CoordinatorConfig) -> Result<Self, CoreError> {
        let http = TransportConfig {
            timeout: config.timeout,
        }
        .build_client()
        .map_err(|e| CoreError::Config {
            message: format!("HTTP client: {e}"),
        })?;

        let auth = AuthClient::new(http.clone(), config.client_id.clone(), config.auth_endpoints.clone());
        let credentials = CredentialManager::new(auth, config.refresh_margin);
        let api = TelemetryClient::new(http, config.api_base_url.clone());
        let budget = RateBudget::new(config.call_ceiling, CoordinatorConfig::BUDGET_WINDOW);

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                config,
                credentials,
                api,
                budget,
                registry: DiscoveryRegistry::new(),
                store: StateStore::new(),
                container_id: Mutex::new(None),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Credential lifecycle: device flow, token install, state watch.
    pub fn credentials(&self) -> &CredentialManager {
        &self.inner.credentials
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub fn registry(&self) -> &DiscoveryRegistry {
        &self.inner.registry
    }

    /// Restore a previously assigned container id, skipping the
    /// discovery calls it would otherwise cost.
    pub async fn set_container_id(&self, id: impl Into<String>) {
        *self.inner.container_id.lock().await = Some(id.into());
    }

    pub async fn container_id(&self) -> Option<String> {
        self.inner.container_id.lock().await.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Discover vehicles, ensure the telemetry container, run one poll
    /// cycle, then spawn the periodic poller and the stream listener.
    pub async fn start(&self) -> Result<(), CoreError> {
        match self.inner.credentials.state() {
            AuthState::Authorized => {}
            AuthState::Expired => return Err(CoreError::ReauthorizationRequired),
            _ => return Err(CoreError::NotAuthorized),
        }

        self.discover_vehicles().await?;
        self.ensure_container().await?;
        self.poll_cycle().await?;

        let mut handles = self.inner.task_handles.lock().await;

        let coordinator = self.clone();
        let cancel = self.inner.cancel.clone();
        handles.push(tokio::spawn(poll_task(coordinator, cancel)));

        let stream = StreamHandle::connect(
            self.inner.config.stream_url.clone(),
            self.inner.credentials.stream_credentials(),
            self.inner.config.reconnect.clone(),
            self.inner.cancel.child_token(),
        );
        let coordinator = self.clone();
        handles.push(tokio::spawn(stream_task(coordinator, stream)));

        info!(vehicles = self.inner.store.len(), "coordinator started");
        Ok(())
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("coordinator shut down");
    }

    // ── Vehicle discovery ────────────────────────────────────────

    /// List mapped VINs and fetch basic metadata for each.
    ///
    /// Every request is metered. A denied reservation downgrades the
    /// step rather than failing: discovery retries on a later cycle,
    /// and a vehicle without metadata gets a placeholder.
    pub async fn discover_vehicles(&self) -> Result<(), CoreError> {
        if !self.reserve("vehicle mappings") {
            return Ok(());
        }
        let token = self.inner.credentials.access_token().await?;
        let vins = self
            .inner
            .api
            .vehicle_mappings(token.expose_secret())
            .await?;
        info!(count = vins.len(), "discovered mapped vehicles");

        for vin in vins {
            if self.inner.store.contains(&Vin::from(vin.clone())) {
                continue;
            }
            let info = if self.reserve("vehicle basic data") {
                match self
                    .inner
                    .api
                    .vehicle_basic_data(token.expose_secret(), &vin)
                    .await
                {
                    Ok(info) => info,
                    Err(e) => {
                        warn!(vin = %vin, error = %e, "basic data fetch failed");
                        VehicleInfo::unknown(&vin)
                    }
                }
            } else {
                VehicleInfo::unknown(&vin)
            };
            self.inner.store.register_vehicle(info);
        }
        Ok(())
    }

    /// Find or create the telemetry container whose descriptors drive
    /// what the vendor sends us. Skipped silently when the budget is
    /// exhausted; retried by the poll task.
    pub async fn ensure_container(&self) -> Result<(), CoreError> {
        let mut guard = self.inner.container_id.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        if !self.reserve("container listing") {
            return Ok(());
        }
        let token = self.inner.credentials.access_token().await?;
        let ids = self.inner.api.container_ids(token.expose_secret()).await?;
        if let Some(id) = ids.into_iter().next() {
            info!(container_id = %id, "reusing existing telemetry container");
            *guard = Some(id);
            return Ok(());
        }

        if !self.reserve("container creation") {
            return Ok(());
        }
        let spec = ContainerSpec {
            name: DEFAULT_CONTAINER_NAME.into(),
            purpose: DEFAULT_CONTAINER_PURPOSE.into(),
            descriptors: KNOWN_KEYS.iter().map(|k| (*k).to_owned()).collect(),
        };
        let id = self
            .inner
            .api
            .create_container(token.expose_secret(), &spec)
            .await?;
        *guard = Some(id);
        Ok(())
    }

    // ── Polling ──────────────────────────────────────────────────

    /// One poll pass over every known vehicle.
    ///
    /// Per-vehicle isolation: a failure for one VIN is logged and the
    /// pass continues. Two exceptions abort the pass: the terminal
    /// re-authorization state, and a missing container (nothing to
    /// poll against).
    pub async fn poll_cycle(&self) -> Result<(), CoreError> {
        let Some(container_id) = self.container_id().await else {
            warn!("no telemetry container yet, skipping poll cycle");
            return Ok(());
        };

        for vin in self.inner.store.vins() {
            match self.poll_vehicle(&vin, &container_id).await {
                Ok(()) => {}
                Err(CoreError::ReauthorizationRequired) => {
                    return Err(CoreError::ReauthorizationRequired);
                }
                Err(e) => {
                    warn!(vin = %vin, error = %e, "vehicle poll failed");
                }
            }
        }
        Ok(())
    }

    async fn poll_vehicle(&self, vin: &Vin, container_id: &str) -> Result<(), CoreError> {
        if !self.reserve("telemetry poll") {
            return Ok(());
        }

        let token = self.inner.credentials.access_token().await?;
        let readings = self
            .inner
            .api
            .telematic_data(token.expose_secret(), vin.as_str(), container_id)
            .await?;

        let mut accepted = 0usize;
        for reading in readings {
            let value = TelemetryValue::from_reading(vin, reading, Source::Poll);
            if self.inner.store.accept(&self.inner.registry, value)
                == crate::store::MergeOutcome::Accepted
            {
                accepted += 1;
            }
        }
        self.inner.store.mark_seen(vin, Source::Poll);
        debug!(vin = %vin, accepted, "poll cycle for vehicle complete");
        Ok(())
    }

    /// One scheduled pass: retry discovery and container setup if a
    /// budget denial left them incomplete, then poll every vehicle.
    ///
    /// Suspended (not aborted) while the credentials are in the
    /// terminal Expired state; the next tick after a fresh token set is
    /// installed resumes polling.
    async fn poll_tick(&self) {
        if self.inner.credentials.state() == AuthState::Expired {
            debug!("polling suspended until re-authorization");
            return;
        }

        if self.inner.store.is_empty() {
            if let Err(e) = self.discover_vehicles().await {
                warn!(error = %e, "vehicle discovery failed");
                return;
            }
        }
        if let Err(e) = self.ensure_container().await {
            warn!(error = %e, "container setup failed");
            return;
        }
        match self.poll_cycle().await {
            Ok(()) => {}
            Err(CoreError::ReauthorizationRequired) => {
                warn!("re-authorization required, polling suspended");
            }
            Err(e) => warn!(error = %e, "poll cycle failed"),
        }
    }

    /// Reserve one budgeted call, logging the planned skip on denial.
    fn reserve(&self, purpose: &str) -> bool {
        match self.inner.budget.try_reserve(Instant::now()) {
            Reservation::Granted { remaining } => {
                debug!(purpose, remaining, "API call reserved");
                true
            }
            Reservation::Denied { retry_after } => {
                info!(
                    purpose,
                    retry_after_secs = retry_after.as_secs(),
                    "call budget exhausted, skipping"
                );
                false
            }
        }
    }

    // ── Stream ingestion ─────────────────────────────────────────

    /// Merge one push-stream frame into the store.
    fn ingest_frame(&self, frame: TelemetryFrame) {
        let vin = Vin::from(frame.vin);
        if !self.inner.store.contains(&vin) {
            debug!(vin = %vin, "dropping stream frame for unmapped vehicle");
            return;
        }

        for reading in frame.readings {
            let value = TelemetryValue::from_reading(&vin, reading, Source::Stream);
            self.inner.store.accept(&self.inner.registry, value);
        }
        self.inner.store.mark_seen(&vin, Source::Stream);
    }

    // ── Diagnostics ──────────────────────────────────────────────

    /// Calls still available in the current rolling window.
    pub fn remaining_calls(&self) -> usize {
        self.inner.budget.remaining(Instant::now())
    }

    /// Serializable dump of coordinator internals: auth state, token
    /// expiry, the full budget window, and each vehicle's stored values.
    /// VINs are masked and token material never appears.
    pub async fn diagnostics(&self) -> Diagnostics {
        let now = Instant::now();
        let ages = self.inner.budget.call_ages(now);
        let remaining = self.inner.budget.remaining(now);
        let ceiling = self.inner.budget.ceiling();

        let token = self
            .inner
            .credentials
            .tokens_snapshot()
            .await
            .map(|t| TokenDiagnostics {
                account_id: t.account_id,
                expires_at: t.expires_at,
                expires_in_secs: (t.expires_at - chrono::Utc::now()).num_seconds(),
            });

        let vehicles = self
            .inner
            .store
            .snapshot_all()
            .into_iter()
            .map(|snap| VehicleDiagnostics {
                vin: crate::diagnostics::mask_vin(snap.vin.as_str()),
                brand: snap.info.brand,
                model: snap.info.model,
                propulsion: snap.info.propulsion,
                construction_year: snap.info.construction_year,
                telemetry_count: snap.values.len(),
                values: snap.values,
                last_poll: snap.last_poll,
                last_stream: snap.last_stream,
            })
            .collect();

        Diagnostics {
            generated_at: chrono::Utc::now(),
            auth_state: auth_state_name(self.inner.credentials.state()),
            token,
            budget: BudgetDiagnostics {
                ceiling,
                used: ceiling - remaining,
                remaining,
                oldest_call_age_secs: ages.first().map(|d| d.as_secs()),
                call_ages_secs: ages.iter().map(|d| d.as_secs()).collect(),
            },
            vehicles,
            keys: self.inner.registry.summaries(),
        }
    }

    /// Convenience for restoring persisted tokens.
    pub async fn install_tokens(&self, tokens: TokenSet) {
        self.inner.credentials.install(tokens).await;
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Fixed-cadence poll loop. Runs until cancelled; ticks are no-ops
/// while the credentials are expired, so polling resumes in place once
/// re-authorization completes.
async fn poll_task(coordinator: Coordinator, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(coordinator.inner.config.poll_interval);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => coordinator.poll_tick().await,
        }
    }
}

/// Forward decoded stream frames into the merge rule.
async fn stream_task(coordinator: Coordinator, stream: StreamHandle) {
    let cancel = coordinator.inner.cancel.clone();
    let mut frames = stream.into_frames();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                coordinator.ingest_frame(frame);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use carlink_api::auth::AuthEndpoints;
    use carlink_api::rest::TelemetryReading;

    async fn coordinator_for(server: &MockServer, ceiling: usize) -> Coordinator {
        let base: url::Url = server.uri().parse().expect("mock url");
        let config = CoordinatorConfig {
            client_id: "client-1".into(),
            api_base_url: base.clone(),
            auth_endpoints: AuthEndpoints::with_base(&base).expect("endpoints"),
            call_ceiling: ceiling,
            ..CoordinatorConfig::default()
        };
        let coordinator = Coordinator::new(config).expect("coordinator");
        coordinator
            .install_tokens(TokenSet {
                access_token: SecretString::from("at-1".to_string()),
                refresh_token: SecretString::from("rt-1".to_string()),
                id_token: SecretString::from("idt-1".to_string()),
                account_id: "acct-1".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
            .await;
        coordinator
    }

    #[tokio::test]
    async fn poll_cycle_merges_readings_into_store() {
        let server = MockServer::start().await;
        let vin = "WBA000TEST0000001";

        Mock::given(method("GET"))
            .and(path(format!("/customers/vehicles/{vin}/telematicData")))
            .and(query_param("containerId", "ctr-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "telematicData": {
                    "odometer": {
                        "value": 43210,
                        "unit": "km",
                        "timestamp": "2026-02-10T12:00:00Z"
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server, 50).await;
        coordinator.store().register_vehicle(VehicleInfo::unknown(vin));
        coordinator.set_container_id("ctr-1").await;

        coordinator.poll_cycle().await.expect("poll cycle");

        let snap = coordinator
            .store()
            .snapshot(&Vin::from(vin))
            .expect("vehicle");
        assert_eq!(snap.values["odometer"].value, json!(43210));
        assert_eq!(snap.values["odometer"].source, Source::Poll);
        assert!(snap.last_poll.is_some());
    }

    #[tokio::test]
    async fn exhausted_budget_skips_poll_without_error() {
        // Ceiling zero: every reservation is denied, so the cycle must
        // complete without issuing a single request (no mocks mounted).
        let server = MockServer::start().await;
        let coordinator = coordinator_for(&server, 0).await;
        coordinator
            .store()
            .register_vehicle(VehicleInfo::unknown("WBA000TEST0000001"));
        coordinator.set_container_id("ctr-1").await;

        coordinator.poll_cycle().await.expect("planned skip, not error");

        let snap = coordinator
            .store()
            .snapshot(&Vin::from("WBA000TEST0000001"))
            .expect("vehicle");
        assert!(snap.values.is_empty());
        assert!(snap.last_poll.is_none());
    }

    #[tokio::test]
    async fn one_failing_vehicle_does_not_poison_the_cycle() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/customers/vehicles/VINBAD0000000000X/telematicData"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/customers/vehicles/VINGOOD000000000Y/telematicData"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "telematicData": {
                    "outsideTemperature": { "value": 18.5, "unit": "°C",
                        "timestamp": "2026-02-10T12:00:00Z" }
                }
            })))
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server, 50).await;
        coordinator
            .store()
            .register_vehicle(VehicleInfo::unknown("VINBAD0000000000X"));
        coordinator
            .store()
            .register_vehicle(VehicleInfo::unknown("VINGOOD000000000Y"));
        coordinator.set_container_id("ctr-1").await;

        coordinator.poll_cycle().await.expect("cycle continues");

        let good = coordinator
            .store()
            .snapshot(&Vin::from("VINGOOD000000000Y"))
            .expect("vehicle");
        assert!(good.values.contains_key("outsideTemperature"));
    }

    #[tokio::test]
    async fn discovery_registers_vehicles_with_metadata() {
        let server = MockServer::start().await;
        let vin = "WBA000TEST0000001";

        Mock::given(method("GET"))
            .and(path("/customers/vehicles/mappings"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "vin": vin }])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/customers/vehicles/{vin}/basicData")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "brand": "BMW",
                "model": "iX xDrive50",
                "constructionYear": 2025
            })))
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server, 50).await;
        coordinator.discover_vehicles().await.expect("discovery");

        let snap = coordinator
            .store()
            .snapshot(&Vin::from(vin))
            .expect("vehicle registered");
        assert_eq!(snap.info.model, "iX xDrive50");
        assert_eq!(snap.info.construction_year, Some(2025));
    }

    #[tokio::test]
    async fn ensure_container_creates_when_none_exist() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/customers/containers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/customers/containers"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({ "containerId": "ctr-new" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server, 50).await;
        coordinator.ensure_container().await.expect("container");
        assert_eq!(coordinator.container_id().await.as_deref(), Some("ctr-new"));

        // Idempotent: a second call issues no further requests.
        coordinator.ensure_container().await.expect("cached");
    }

    #[tokio::test]
    async fn stream_frames_merge_with_poll_state() {
        let server = MockServer::start().await;
        let coordinator = coordinator_for(&server, 50).await;
        let vin = Vin::from("WBA000TEST0000001");
        coordinator
            .store()
            .register_vehicle(VehicleInfo::unknown(vin.as_str()));

        // Older poll value first.
        let poll = TelemetryValue::from_reading(
            &vin,
            TelemetryReading {
                key: "electricVehicle.chargingLevelHv".into(),
                value: json!(60),
                unit: Some("%".into()),
                timestamp: Some("2026-02-10T12:00:00Z".parse().expect("ts")),
            },
            Source::Poll,
        );
        coordinator.store().accept(coordinator.registry(), poll);

        coordinator.ingest_frame(TelemetryFrame {
            vin: vin.to_string(),
            readings: vec![TelemetryReading {
                key: "electricVehicle.chargingLevelHv".into(),
                value: json!(61),
                unit: Some("%".into()),
                timestamp: Some("2026-02-10T12:05:00Z".parse().expect("ts")),
            }],
        });

        let snap = coordinator.store().snapshot(&vin).expect("vehicle");
        let stored = &snap.values["electricVehicle.chargingLevelHv"];
        assert_eq!(stored.value, json!(61));
        assert_eq!(stored.source, Source::Stream);
        assert!(snap.last_stream.is_some());
    }

    #[tokio::test]
    async fn frames_for_unmapped_vehicles_are_dropped() {
        let server = MockServer::start().await;
        let coordinator = coordinator_for(&server, 50).await;

        coordinator.ingest_frame(TelemetryFrame {
            vin: "VINUNKNOWN000000Z".into(),
            readings: vec![TelemetryReading {
                key: "odometer".into(),
                value: json!(1),
                unit: None,
                timestamp: None,
            }],
        });

        assert!(coordinator.store().is_empty());
    }

    #[tokio::test]
    async fn start_requires_credentials() {
        let config = CoordinatorConfig {
            client_id: "client-1".into(),
            ..CoordinatorConfig::default()
        };
        let coordinator = Coordinator::new(config).expect("coordinator");

        let err = coordinator.start().await.expect_err("no credentials");
        assert!(matches!(err, CoreError::NotAuthorized));
    }

    #[tokio::test]
    async fn diagnostics_mask_vins() {
        let server = MockServer::start().await;
        let coordinator = coordinator_for(&server, 50).await;
        coordinator
            .store()
            .register_vehicle(VehicleInfo::unknown("WBA000TEST0000001"));

        let diag = coordinator.diagnostics().await;
        assert_eq!(diag.auth_state, "authorized");
        assert_eq!(diag.vehicles[0].vin, "*************0001");
        assert_eq!(diag.budget.ceiling, 50);
    }

    #[tokio::test]
    async fn diagnostics_carry_token_expiry_budget_window_and_values() {
        let server = MockServer::start().await;
        let vin = "WBA000TEST0000001";

        Mock::given(method("GET"))
            .and(path(format!("/customers/vehicles/{vin}/telematicData")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "telematicData": {
                    "odometer": {
                        "value": 43210,
                        "unit": "km",
                        "timestamp": "2026-02-10T12:00:00Z"
                    }
                }
            })))
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server, 50).await;
        coordinator.store().register_vehicle(VehicleInfo::unknown(vin));
        coordinator.set_container_id("ctr-1").await;
        coordinator.poll_cycle().await.expect("poll cycle");

        let diag = coordinator.diagnostics().await;

        let token = diag.token.expect("token view");
        assert_eq!(token.account_id, "acct-1");
        assert!(token.expires_in_secs > 3_000);

        assert_eq!(diag.budget.used, 1);
        assert_eq!(diag.budget.call_ages_secs.len(), 1);

        assert_eq!(diag.vehicles[0].values["odometer"].value, json!(43210));
    }

    #[tokio::test]
    async fn polling_suspends_while_expired_and_resumes_after_install() {
        let server = MockServer::start().await;
        let vin = "WBA000TEST0000001";

        // The refresh token is rejected exactly once.
        Mock::given(method("POST"))
            .and(path("/gcdm/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/customers/vehicles/{vin}/telematicData")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "telematicData": {
                    "odometer": {
                        "value": 43210,
                        "unit": "km",
                        "timestamp": "2026-02-10T12:00:00Z"
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server, 50).await;
        coordinator.store().register_vehicle(VehicleInfo::unknown(vin));
        coordinator.set_container_id("ctr-1").await;

        // Drive the credentials into the terminal state: a near-expiry
        // token forces a refresh, which the server rejects.
        coordinator
            .install_tokens(TokenSet {
                access_token: SecretString::from("at-1".to_string()),
                refresh_token: SecretString::from("rt-dead".to_string()),
                id_token: SecretString::from("idt-1".to_string()),
                account_id: "acct-1".into(),
                expires_at: Utc::now() + chrono::Duration::seconds(10),
            })
            .await;
        let err = coordinator
            .credentials()
            .access_token()
            .await
            .expect_err("rejected refresh");
        assert!(matches!(err, CoreError::ReauthorizationRequired));

        // Suspended: the tick is a no-op, not an exit (the mocks above
        // prove no request went out).
        coordinator.poll_tick().await;
        let snap = coordinator
            .store()
            .snapshot(&Vin::from(vin))
            .expect("vehicle");
        assert!(snap.values.is_empty());

        // A fresh install resumes polling on the next tick.
        coordinator
            .install_tokens(TokenSet {
                access_token: SecretString::from("at-2".to_string()),
                refresh_token: SecretString::from("rt-2".to_string()),
                id_token: SecretString::from("idt-2".to_string()),
                account_id: "acct-1".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
            .await;
        coordinator.poll_tick().await;

        let snap = coordinator
            .store()
            .snapshot(&Vin::from(vin))
            .expect("vehicle");
        assert_eq!(snap.values["odometer"].value, json!(43210));
    }
}
