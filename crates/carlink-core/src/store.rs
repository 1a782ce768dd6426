// ── Vehicle state store and merge rule ──
//
// Per-vehicle key/value state fed by both the poller and the stream
// listener. Merging is last-writer-wins by observation timestamp with
// strict inequality: an equal-timestamp arrival loses to the stored
// value, so replaying the same observation is a no-op.
//
// Consumers observe state through a `watch` snapshot channel rebuilt
// after every accepted write, the same shape the CLI renders.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use carlink_api::rest::VehicleInfo;

use crate::discovery::DiscoveryRegistry;
use crate::model::{Source, TelemetryValue, Vin};

/// Result of offering one observation to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Newer than the stored value (or first observation); stored.
    Accepted,
    /// Older than or equal to the stored value; discarded.
    StaleDiscarded,
    /// Key rejected by the discovery registry; never stored.
    Rejected,
}

/// One stored telemetry datum with provenance.
#[derive(Debug, Clone, Serialize)]
pub struct StoredValue {
    pub value: Value,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
}

/// Immutable view of one vehicle's current state.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleSnapshot {
    pub vin: Vin,
    pub info: VehicleInfo,
    pub values: BTreeMap<String, StoredValue>,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_stream: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct VehicleSlot {
    info: VehicleInfo,
    values: BTreeMap<String, StoredValue>,
    last_poll: Option<DateTime<Utc>>,
    last_stream: Option<DateTime<Utc>>,
}

/// Concurrent store of all vehicles under the account.
pub struct StateStore {
    vehicles: DashMap<Vin, VehicleSlot>,
    snapshot_tx: watch::Sender<Vec<VehicleSnapshot>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(Vec::new());
        Self {
            vehicles: DashMap::new(),
            snapshot_tx,
        }
    }

    /// Subscribe to full-state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Vec<VehicleSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Register a vehicle (idempotent). Existing telemetry survives an
    /// info update.
    pub fn register_vehicle(&self, info: VehicleInfo) {
        let vin = Vin::from(info.vin.clone());
        match self.vehicles.entry(vin) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                slot.get_mut().info = info;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(VehicleSlot {
                    info,
                    values: BTreeMap::new(),
                    last_poll: None,
                    last_stream: None,
                });
            }
        }
        self.publish();
    }

    pub fn contains(&self, vin: &Vin) -> bool {
        self.vehicles.contains_key(vin)
    }

    pub fn vins(&self) -> Vec<Vin> {
        self.vehicles.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Offer one observation to the merge rule.
    ///
    /// The registry classifies the key first; rejected keys are never
    /// stored. An observation for an unregistered vehicle is accepted
    /// into a fresh slot with placeholder info.
    pub fn accept(&self, registry: &DiscoveryRegistry, value: TelemetryValue) -> MergeOutcome {
        if !registry.classify(&value.key, &value.value).is_admitted() {
            return MergeOutcome::Rejected;
        }

        let outcome = {
            let mut slot = self
                .vehicles
                .entry(value.vin.clone())
                .or_insert_with(|| VehicleSlot {
                    info: VehicleInfo::unknown(value.vin.as_str()),
                    values: BTreeMap::new(),
                    last_poll: None,
                    last_stream: None,
                });

            match slot.values.get(&value.key) {
                // Strictly greater wins; ties keep the stored value.
                Some(stored) if value.timestamp <= stored.timestamp => {
                    debug!(
                        vin = %value.vin,
                        key = %value.key,
                        source = %value.source,
                        "discarding stale observation"
                    );
                    MergeOutcome::StaleDiscarded
                }
                _ => {
                    slot.values.insert(
                        value.key,
                        StoredValue {
                            value: value.value,
                            unit: value.unit,
                            timestamp: value.timestamp,
                            source: value.source,
                        },
                    );
                    MergeOutcome::Accepted
                }
            }
        };

        if outcome == MergeOutcome::Accepted {
            self.publish();
        }
        outcome
    }

    /// Record that a cycle from `source` completed for `vin`, whether
    /// or not it produced accepted values.
    pub fn mark_seen(&self, vin: &Vin, source: Source) {
        if let Some(mut slot) = self.vehicles.get_mut(vin) {
            let now = Utc::now();
            match source {
                Source::Poll => slot.last_poll = Some(now),
                Source::Stream => slot.last_stream = Some(now),
            }
        }
        self.publish();
    }

    /// Current snapshot of one vehicle.
    pub fn snapshot(&self, vin: &Vin) -> Option<VehicleSnapshot> {
        self.vehicles.get(vin).map(|slot| snapshot_of(vin, &slot))
    }

    /// Current snapshot of every vehicle, sorted by VIN.
    pub fn snapshot_all(&self) -> Vec<VehicleSnapshot> {
        let mut out: Vec<VehicleSnapshot> = self
            .vehicles
            .iter()
            .map(|entry| snapshot_of(entry.key(), &entry))
            .collect();
        out.sort_by(|a, b| a.vin.as_str().cmp(b.vin.as_str()));
        out
    }

    fn publish(&self) {
        // Rebuilt inside the channel's critical section: concurrent
        // writers serialize here, and the last one to run re-reads the
        // map, so the published value never regresses past a write.
        self.snapshot_tx
            .send_modify(|snapshot| *snapshot = self.snapshot_all());
    }
}

fn snapshot_of(vin: &Vin, slot: &VehicleSlot) -> VehicleSnapshot {
    VehicleSnapshot {
        vin: vin.clone(),
        info: slot.info.clone(),
        values: slot.values.clone(),
        last_poll: slot.last_poll,
        last_stream: slot.last_stream,
    }
}

// ── Tests ────────────────────────────────────────────────────────────
