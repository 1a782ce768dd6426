//! Bearer-authenticated REST client for the vendor's telemetry API.
//!
//! Every call here is metered against a 50-calls-per-24h account budget
//! on the vendor side; the client itself does no budgeting -- that is
//! the Rate Budget Tracker's job in `carlink-core`. Tokens are passed
//! per call because their lifecycle is owned by the Credential Manager.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;

/// API version header required on every request.
const API_VERSION: &str = "v1";

/// Default values for the telemetry container created on first run.
pub const DEFAULT_CONTAINER_NAME: &str = "carlink";
pub const DEFAULT_CONTAINER_PURPOSE: &str = "Vehicle telemetry for carlink";

// ── Wire / domain types ──────────────────────────────────────────────

/// Basic vehicle metadata, fetched once at discovery.
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct VehicleInfo {
    #[serde(default)]
    pub vin: String,
    #[serde(default = "default_brand")]
    pub brand: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub propulsion: String,
    #[serde(rename = "constructionYear", default)]
    pub construction_year: Option<u16>,
}

fn default_brand() -> String {
    "Unknown".into()
}
fn default_model() -> String {
    "Unknown".into()
}

impl VehicleInfo {
    /// Placeholder when `basicData` fails for a VIN we know exists.
    pub fn unknown(vin: impl Into<String>) -> Self {
        Self {
            vin: vin.into(),
            brand: default_brand(),
            model: default_model(),
            propulsion: String::new(),
            construction_year: None,
        }
    }
}

/// One decoded telemetry data point from a poll response.
#[derive(Debug, Clone)]
pub struct TelemetryReading {
    pub key: String,
    pub value: Value,
    pub unit: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Request body for creating a telemetry container.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContainerSpec {
    pub name: String,
    pub purpose: String,
    #[serde(rename = "technicalDescriptors")]
    pub descriptors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TelematicDataEnvelope {
    #[serde(rename = "telematicData", default)]
    telematic_data: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ValueEntry {
    value: Value,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

// ── Client ───────────────────────────────────────────────────────────

/// HTTP client for the telemetry REST endpoints.
pub struct TelemetryClient {
    http: reqwest::Client,
    base_url: Url,
}

impl TelemetryClient {
    /// Production base URL.
    // Literal URL cannot fail to parse.
    #[allow(clippy::unwrap_used)]
    pub fn default_base_url() -> Url {
        "https://api-cardata.bmwgroup.com".parse().unwrap()
    }

    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// List the VINs mapped to this account.
    ///
    /// `GET /customers/vehicles/mappings` -- the response is either a
    /// bare list of VIN strings or a list of `{"vin": ...}` objects.
    pub async fn vehicle_mappings(&self, token: &str) -> Result<Vec<String>, Error> {
        let body: Value = self
            .get(token, "/customers/vehicles/mappings", &[])
            .await?;

        let items = match &body {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => map
                .get("mappings")
                .and_then(Value::as_array)
                .map_or(&[][..], Vec::as_slice),
            _ => &[],
        };

        let vins = items
            .iter()
            .filter_map(|item| match item {
                Value::String(vin) => Some(vin.clone()),
                Value::Object(map) => map
                    .get("vin")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                _ => None,
            })
            .collect();

        Ok(vins)
    }

    /// Fetch basic metadata for one vehicle.
    ///
    /// `GET /customers/vehicles/{vin}/basicData`
    pub async fn vehicle_basic_data(&self, token: &str, vin: &str) -> Result<VehicleInfo, Error> {
        let path = format!("/customers/vehicles/{vin}/basicData");
        let mut info: VehicleInfo = self.get_typed(token, &path).await?;
        // The mappings endpoint is authoritative for the VIN; basicData
        // sometimes omits it.
        if info.vin.is_empty() {
            info.vin = vin.to_owned();
        }
        Ok(info)
    }

    /// Fetch the current telemetry snapshot for one vehicle.
    ///
    /// `GET /customers/vehicles/{vin}/telematicData?containerId={id}`
    /// Response shape: `{"telematicData": {key: {value, unit, timestamp}}}`.
    /// Entries with a null value are skipped.
    pub async fn telematic_data(
        &self,
        token: &str,
        vin: &str,
        container_id: &str,
    ) -> Result<Vec<TelemetryReading>, Error> {
        let path = format!("/customers/vehicles/{vin}/telematicData");
        let envelope: TelematicDataEnvelope = self
            .get_typed_with_query(token, &path, &[("containerId", container_id)])
            .await?;

        let mut readings = Vec::with_capacity(envelope.telematic_data.len());
        for (key, raw) in envelope.telematic_data {
            let entry: ValueEntry = match serde_json::from_value(raw) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(%key, error = %e, "skipping malformed telemetry entry");
                    continue;
                }
            };
            if entry.value.is_null() {
                continue;
            }
            readings.push(TelemetryReading {
                key,
                value: entry.value,
                unit: entry.unit,
                timestamp: entry.timestamp,
            });
        }

        debug!(vin, count = readings.len(), "decoded poll response");
        Ok(readings)
    }

    /// List existing telemetry containers.
    ///
    /// `GET /customers/containers` -- container objects are loosely
    /// shaped; we only need an id, under any of its observed spellings.
    pub async fn container_ids(&self, token: &str) -> Result<Vec<String>, Error> {
        let body: Value = self.get(token, "/customers/containers", &[]).await?;

        let items = match &body {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => map
                .get("containers")
                .and_then(Value::as_array)
                .map_or(&[][..], Vec::as_slice),
            _ => &[],
        };

        let ids = items
            .iter()
            .filter_map(|c| {
                let map = c.as_object()?;
                map.get("containerId")
                    .or_else(|| map.get("id"))
                    .or_else(|| map.get("container_id"))
                    .and_then(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
            })
            .collect();

        Ok(ids)
    }

    /// Create a telemetry container and return its id.
    ///
    /// `POST /customers/containers`
    pub async fn create_container(&self, token: &str, spec: &ContainerSpec) -> Result<String, Error> {
        let url = self.base_url.join("/customers/containers")?;

        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .header("x-version", API_VERSION)
            .json(spec)
            .send()
            .await?;

        let body: Value = Self::check(resp).await?;
        let id = body
            .get("containerId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        debug!(name = %spec.name, container_id = %id, "created telemetry container");
        Ok(id)
    }

    // ── Request plumbing ─────────────────────────────────────────────

    async fn get(&self, token: &str, path: &str, query: &[(&str, &str)]) -> Result<Value, Error> {
        let url = self.base_url.join(path)?;
        debug!(%url, "API GET");

        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("x-version", API_VERSION)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        Self::check(resp).await
    }

    async fn get_typed<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
    ) -> Result<T, Error> {
        self.get_typed_with_query(token, path, &[]).await
    }

    async fn get_typed_with_query<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, Error> {
        let body = self.get(token, path, query).await?;
        serde_json::from_value(body.clone()).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.to_string(),
        })
    }

    /// Map non-2xx statuses to errors, otherwise parse the JSON body.
    async fn check(resp: reqwest::Response) -> Result<Value, Error> {
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            return Err(Error::RateLimitedUpstream { retry_after_secs });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        if resp.content_length() == Some(0) {
            return Ok(Value::Null);
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.chars().take(500).collect(),
        })
    }
}
