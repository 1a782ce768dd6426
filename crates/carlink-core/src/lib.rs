// carlink-core: The telemetry coordinator between carlink-api and
// consumers (CLI, host entity layers).

pub mod budget;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod model;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use budget::{RateBudget, Reservation};
pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use credentials::{AuthState, CredentialManager};
pub use diagnostics::Diagnostics;
pub use discovery::{DiscoveryRegistry, KeyClass, SemanticType};
pub use error::CoreError;
pub use model::{Source, TelemetryValue, Vin};
pub use store::{MergeOutcome, StateStore, StoredValue, VehicleSnapshot};
