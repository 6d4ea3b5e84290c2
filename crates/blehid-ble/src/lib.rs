//! Bluetooth Low Energy GATT transport for the HID bridge
//!
//! This crate hosts the HID-over-GATT service: it builds the service on a GATT
//! platform, keeps it advertising, tracks subscribed centrals and delivers HID
//! reports to them. It implements the `ReportSink` and `AdvertisementBackend`
//! traits from `blehid-core`.
//!
//! ## Architecture
//!
//! - [`gatt`] - GATT platform abstraction with BlueZ and simulated backends
//! - [`protocol`] - HID service and characteristic constants
//! - [`factory`] - HID service construction, validation and disposal
//! - [`devices`] - Connected device table
//! - [`transport`] - Transport state machine and report delivery
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use blehid_ble::gatt::simulated::SimulatedPlatform;
//! use blehid_ble::GattTransportService;
//! use blehid_core::{CircuitBreaker, CircuitBreakerConfig, TransportConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = GattTransportService::new(
//!     TransportConfig::new().with_device_name("Desk Keyboard"),
//!     Arc::new(SimulatedPlatform::new()),
//!     Arc::new(CircuitBreaker::new("gatt", CircuitBreakerConfig::default())),
//! );
//!
//! transport.start(&CancellationToken::new()).await?;
//! // Reports now reach every subscribed central
//! transport.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: GATT server and advertising via `bluer` (BlueZ)
//! - **Other platforms**: simulated provider only; `btleplug` reports adapter presence

mod backend;
pub mod devices;
mod discovery_monitor;
pub mod factory;
pub mod gatt;
pub mod protocol;
pub mod transport;

// Public API exports
pub use devices::{ConnectionChange, ConnectionTable};
pub use factory::{ServiceFactory, ServiceHealthReport};
pub use gatt::probe::BtleplugProbe;
pub use gatt::simulated::{AdvertisingOutcome, SimulatedPlatform, SimulatedService};
pub use gatt::{
    AdvertisingParameters, CharacteristicParameters, GattPlatform, GattService, GattServiceEvent,
    HandlerId, SubscribedClient,
};
pub use protocol::{ControlPointCommand, HID_SERVICE_UUID, REPORT_CHARACTERISTIC_UUID};
pub use transport::{DeliverySummary, GattTransportService, TransportEvent};

#[cfg(target_os = "linux")]
pub use gatt::bluez::{BluezPlatform, BluezService};
