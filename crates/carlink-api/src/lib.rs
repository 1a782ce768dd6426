// carlink-api: Async client for the vendor's CarData surfaces
// (OAuth device flow + token refresh, telemetry REST, push stream).

pub mod auth;
pub mod error;
pub mod rest;
pub mod stream;
pub mod transport;

pub use auth::{AuthClient, AuthEndpoints, DeviceAuthorization, TokenSet};
pub use error::Error;
pub use rest::{ContainerSpec, TelemetryClient, TelemetryReading, VehicleInfo};
pub use stream::{ReconnectConfig, StreamCredentials, StreamHandle, TelemetryFrame};
