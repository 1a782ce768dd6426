// ── Key discovery registry ──
//
// Telemetry keys fall into three classes: known keys with curated
// semantics, unknown-but-numeric keys admitted as generic measurements,
// and everything else rejected. Classification is memoized per key --
// the first observation decides, and later shape changes only set the
// `type_inconsistent` flag rather than reclassifying.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::value_is_numeric;

/// Broad category of a known key, used by consumers to decide how to
/// present and aggregate the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Point-in-time numeric measurement.
    Measurement,
    /// Monotonically increasing counter (odometer).
    TotalIncreasing,
    /// Discrete textual status (charging status, lock state).
    Status,
    /// Two-state value derived from a textual raw value.
    Binary,
}

/// Curated semantics for a known telemetry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SemanticType {
    /// Stable consumer-facing identifier (snake_case).
    pub label: &'static str,
    pub unit: Option<&'static str>,
    pub category: Category,
}

/// Classification of one telemetry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// In the curated table; full semantics available.
    Known(SemanticType),
    /// Unknown key whose first observed value was numeric. Admitted as
    /// a generic unitless measurement.
    DiscoveredNumeric,
    /// Unknown key with a non-numeric first value. Not stored.
    Rejected,
}

impl KeyClass {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Known(_) => "known",
            Self::DiscoveredNumeric => "discovered_numeric",
            Self::Rejected => "rejected",
        }
    }
}

// ── Curated key table ────────────────────────────────────────────────

const fn measurement(label: &'static str, unit: &'static str) -> SemanticType {
    SemanticType {
        label,
        unit: Some(unit),
        category: Category::Measurement,
    }
}

const fn binary(label: &'static str) -> SemanticType {
    SemanticType {
        label,
        unit: None,
        category: Category::Binary,
    }
}

/// Every key in the curated table, in container-descriptor order.
pub const KNOWN_KEYS: &[&str] = &[
    "electricVehicle.chargingLevelHv",
    "electricVehicle.remainingRangeElectric",
    "electricVehicle.chargingPower",
    "electricVehicle.chargingTimeRemaining",
    "electricVehicle.chargingStatus",
    "fuel.remainingFuel",
    "fuel.remainingRangeFuel",
    "remainingRangeCombined",
    "odometer",
    "tirePressure.frontLeft",
    "tirePressure.frontRight",
    "tirePressure.rearLeft",
    "tirePressure.rearRight",
    "outsideTemperature",
    "doors.driverFront",
    "doors.driverRear",
    "doors.passengerFront",
    "doors.passengerRear",
    "windows.driverFront",
    "windows.driverRear",
    "windows.passengerFront",
    "windows.passengerRear",
    "hood",
    "trunk",
    "doorLockState",
    "electricVehicle.chargingActive",
    "electricVehicle.pluggedIn",
];

/// Semantics for a key the vendor documents, if any.
pub fn known_semantic(key: &str) -> Option<SemanticType> {
    let semantic = match key {
        // Electric / HV battery
        "electricVehicle.chargingLevelHv" => measurement("battery_level", "%"),
        "electricVehicle.remainingRangeElectric" => measurement("range_electric", "km"),
        "electricVehicle.chargingPower" => measurement("charging_power", "kW"),
        "electricVehicle.chargingTimeRemaining" => measurement("charging_time_remaining", "min"),
        "electricVehicle.chargingStatus" => SemanticType {
            label: "charging_status",
            unit: None,
            category: Category::Status,
        },
        // Fuel
        "fuel.remainingFuel" => measurement("fuel_level", "L"),
        "fuel.remainingRangeFuel" => measurement("range_fuel", "km"),
        "remainingRangeCombined" => measurement("range_combined", "km"),
        // Odometer
        "odometer" => SemanticType {
            label: "odometer",
            unit: Some("km"),
            category: Category::TotalIncreasing,
        },
        // Tire pressure
        "tirePressure.frontLeft" => measurement("tire_pressure_front_left", "bar"),
        "tirePressure.frontRight" => measurement("tire_pressure_front_right", "bar"),
        "tirePressure.rearLeft" => measurement("tire_pressure_rear_left", "bar"),
        "tirePressure.rearRight" => measurement("tire_pressure_rear_right", "bar"),
        // Temperature
        "outsideTemperature" => measurement("outside_temperature", "°C"),
        // Doors, windows, closures
        "doors.driverFront" => binary("door_driver_front"),
        "doors.driverRear" => binary("door_driver_rear"),
        "doors.passengerFront" => binary("door_passenger_front"),
        "doors.passengerRear" => binary("door_passenger_rear"),
        "windows.driverFront" => binary("window_driver_front"),
        "windows.driverRear" => binary("window_driver_rear"),
        "windows.passengerFront" => binary("window_passenger_front"),
        "windows.passengerRear" => binary("window_passenger_rear"),
        "hood" => binary("hood"),
        "trunk" => binary("trunk"),
        "doorLockState" => binary("locked"),
        // Charging state
        "electricVehicle.chargingActive" => binary("charging_active"),
        "electricVehicle.pluggedIn" => binary("plugged_in"),
        _ => return None,
    };
    Some(semantic)
}

// ── Registry ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct KeyRecord {
    class: KeyClass,
    /// First observation was numeric. Tracked so later shape flips can
    /// be flagged without reclassifying.
    first_numeric: bool,
    type_inconsistent: bool,
    first_seen: DateTime<Utc>,
}

/// Summary of one registered key, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct KeySummary {
    pub key: String,
    pub class: &'static str,
    pub type_inconsistent: bool,
    pub first_seen: DateTime<Utc>,
}

/// Memoized per-key classifier, shared by the poller and the stream
/// listener. Account-scoped, not per-vehicle.
#[derive(Default)]
pub struct DiscoveryRegistry {
    keys: DashMap<String, KeyRecord>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `key` given an observed `value`.
    ///
    /// The first call for a key decides its class permanently. Later
    /// calls return the memoized class; an observation whose numeric
    /// shape differs from the first flips `type_inconsistent` once.
    pub fn classify(&self, key: &str, value: &Value) -> KeyClass {
        let numeric = value_is_numeric(value);

        if let Some(mut record) = self.keys.get_mut(key) {
            if numeric != record.first_numeric && !record.type_inconsistent {
                warn!(key, "telemetry key changed value shape");
                record.type_inconsistent = true;
            }
            return record.class;
        }

        let class = match known_semantic(key) {
            Some(semantic) => KeyClass::Known(semantic),
            None if numeric => {
                debug!(key, "admitting discovered numeric key");
                KeyClass::DiscoveredNumeric
            }
            None => {
                debug!(key, "rejecting non-numeric unknown key");
                KeyClass::Rejected
            }
        };

        // entry() re-checks under the shard lock: two racing first
        // observations converge on whichever inserted first.
        self.keys
            .entry(key.to_owned())
            .or_insert_with(|| KeyRecord {
                class,
                first_numeric: numeric,
                type_inconsistent: false,
                first_seen: Utc::now(),
            })
            .class
    }

    /// Whether a key has been seen and admitted.
    pub fn is_admitted(&self, key: &str) -> bool {
        self.keys
            .get(key)
            .is_some_and(|r| r.class.is_admitted())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// All registered keys, sorted, for diagnostics output.
    pub fn summaries(&self) -> Vec<KeySummary> {
        let mut out: Vec<KeySummary> = self
            .keys
            .iter()
            .map(|entry| KeySummary {
                key: entry.key().clone(),
                class: entry.class.name(),
                type_inconsistent: entry.type_inconsistent,
                first_seen: entry.first_seen,
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_keys_resolve_from_table() {
        let registry = DiscoveryRegistry::new();

        let class = registry.classify("odometer", &json!(43210));
        let KeyClass::Known(semantic) = class else {
            panic!("odometer should be known");
        };
        assert_eq!(semantic.label, "odometer");
        assert_eq!(semantic.category, Category::TotalIncreasing);

        let class = registry.classify("doorLockState", &json!("LOCKED"));
        assert!(matches!(
            class,
            KeyClass::Known(SemanticType {
                category: Category::Binary,
                ..
            })
        ));
    }

    #[test]
    fn unknown_numeric_keys_are_admitted() {
        let registry = DiscoveryRegistry::new();

        assert_eq!(
            registry.classify("battery.cellVoltage03", &json!(3.92)),
            KeyClass::DiscoveredNumeric
        );
        // String-encoded numbers count as numeric.
        assert_eq!(
            registry.classify("battery.cellVoltage04", &json!("3.91")),
            KeyClass::DiscoveredNumeric
        );
        assert!(registry.is_admitted("battery.cellVoltage03"));
    }

    #[test]
    fn unknown_non_numeric_keys_are_rejected() {
        let registry = DiscoveryRegistry::new();

        assert_eq!(
            registry.classify("someOpaqueBlob", &json!({"a": 1})),
            KeyClass::Rejected
        );
        assert!(!registry.is_admitted("someOpaqueBlob"));
    }

    #[test]
    fn classification_is_memoized_on_first_observation() {
        let registry = DiscoveryRegistry::new();

        assert_eq!(
            registry.classify("mystery.key", &json!("not a number")),
            KeyClass::Rejected
        );
        // A later numeric value does not rescue the key.
        assert_eq!(
            registry.classify("mystery.key", &json!(5)),
            KeyClass::Rejected
        );
    }

    #[test]
    fn shape_change_sets_inconsistency_flag_once() {
        let registry = DiscoveryRegistry::new();

        registry.classify("flappy.key", &json!(1.0));
        registry.classify("flappy.key", &json!("ACTIVE"));
        registry.classify("flappy.key", &json!(2.0));

        let summary = registry
            .summaries()
            .into_iter()
            .find(|s| s.key == "flappy.key")
            .expect("registered");
        assert_eq!(summary.class, "discovered_numeric");
        assert!(summary.type_inconsistent);
    }

    #[test]
    fn known_keys_list_matches_table() {
        for key in KNOWN_KEYS {
            assert!(known_semantic(key).is_some(), "{key} missing from table");
        }
    }

    #[test]
    fn summaries_are_sorted_by_key() {
        let registry = DiscoveryRegistry::new();
        registry.classify("zeta", &json!(1));
        registry.classify("alpha", &json!(2));

        let keys: Vec<_> = registry.summaries().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
