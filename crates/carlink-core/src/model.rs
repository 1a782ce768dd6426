// ── Core domain types ──
//
// The tuple vocabulary shared by the poller, the stream listener, and
// the state merger. `TelemetryValue` is ephemeral: created per event,
// consumed by the merge rule, then discarded.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use carlink_api::rest::TelemetryReading;

/// Vehicle identity (VIN-equivalent). Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vin(String);

impl Vin {
    pub fn new(vin: impl Into<String>) -> Self {
        Self(vin.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Vin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Vin {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Vin {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Which source produced an observation (provenance tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Poll,
    Stream,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => f.write_str("poll"),
            Self::Stream => f.write_str("stream"),
        }
    }
}

/// One observation: (vehicle, key, value, observed-at, source).
///
/// Readings without a vendor timestamp get the local receive time --
/// the merge rule needs a total order per key, and "now" is the best
/// available approximation for an untimestamped observation.
#[derive(Debug, Clone)]
pub struct TelemetryValue {
    pub vin: Vin,
    pub key: String,
    pub value: Value,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
}

impl TelemetryValue {
    /// Build from a decoded wire reading.
    pub fn from_reading(vin: &Vin, reading: TelemetryReading, source: Source) -> Self {
        Self {
            vin: vin.clone(),
            key: reading.key,
            value: reading.value,
            unit: reading.unit,
            timestamp: reading.timestamp.unwrap_or_else(Utc::now),
            source,
        }
    }

    /// Whether the raw value parses as a number.
    ///
    /// The vendor frequently sends numerics as strings; both shapes
    /// count as numeric for classification purposes.
    pub fn is_numeric(&self) -> bool {
        value_is_numeric(&self.value)
    }
}

/// Shared numeric test for classification and inconsistency tracking.
pub(crate) fn value_is_numeric(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_detection_covers_string_numbers() {
        assert!(value_is_numeric(&json!(42)));
        assert!(value_is_numeric(&json!(12.5)));
        assert!(value_is_numeric(&json!("80")));
        assert!(value_is_numeric(&json!(" 3.14 ")));
        assert!(!value_is_numeric(&json!("LOCKED")));
        assert!(!value_is_numeric(&json!(true)));
        assert!(!value_is_numeric(&json!(null)));
        assert!(!value_is_numeric(&json!({"nested": 1})));
    }

    #[test]
    fn reading_without_timestamp_gets_local_time() {
        let vin = Vin::from("WBA000TEST0000001");
        let before = Utc::now();
        let value = TelemetryValue::from_reading(
            &vin,
            TelemetryReading {
                key: "odometer".into(),
                value: json!(12000),
                unit: Some("km".into()),
                timestamp: None,
            },
            Source::Poll,
        );
        assert!(value.timestamp >= before);
        assert_eq!(value.source, Source::Poll);
    }
}
