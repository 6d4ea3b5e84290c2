//! BLE HID Bridge Core
//!
//! This crate provides the platform-independent half of the BLE HID bridge:
//! shared types and errors, configuration, the circuit breaker guarding GATT
//! operations, the health monitor, HID report construction, the input
//! pipeline and the advertisement manager.
//!
//! Platform code lives in `blehid-ble`, which implements the traits defined
//! here ([`AdapterProbe`], [`ReportSink`], [`AdvertisementBackend`]).

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod adapter;
pub mod advertisement;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod health;
pub mod hid;
pub mod input;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use adapter::{AdapterProbe, StaticAdapterProbe};
pub use advertisement::{
    AdvertisementBackend, AdvertisementConfig, AdvertisementManager, AdvertisementState,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerMetrics, CircuitState, CircuitTransition,
};
pub use config::{
    AdvertisingRetryConfig, CircuitBreakerConfig, HealthMonitorConfig, TransportConfig,
    HID_SERVICE_UUID,
};
pub use errors::{BlehidError, BlehidResult, CircuitOpenError, TransportError};
pub use health::{HealthMonitor, HealthStatus, NoopRecorder, OperationRecorder};
pub use hid::HidReportBuilder;
pub use input::{InputEvent, InputPipeline, KeyboardEvent, MouseEvent, ReportSink};
pub use types::{
    AdapterStatus, AdvertisementStatus, ConnectedDevice, DeviceConnectionState, DeviceId,
    HidReport, InputSource, ReportType, Timestamp, TransportServiceState,
};
