//! Error types for the BLE HID bridge
//!
//! This module contains the error types used by every crate in the workspace:
//! transport errors raised by the GATT layer, admission rejections raised by the
//! circuit breaker, and the `BlehidError` type that unifies them.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::circuit_breaker::CircuitState;
use crate::types::{AdvertisementStatus, DeviceId};

// ----------------------------------------------------------------------------
// Admission Rejections
// ----------------------------------------------------------------------------

/// Raised when the circuit breaker refuses to admit an operation
#[derive(Debug, Clone, Error)]
#[error("Circuit breaker is {state}, next retry in {}ms", retry_after.as_millis())]
pub struct CircuitOpenError {
    /// State the breaker was in when the call was rejected
    pub state: CircuitState,
    /// Earliest instant at which a call may be admitted again
    pub next_retry_at: Option<Instant>,
    /// Convenience form of `next_retry_at` relative to the rejection
    pub retry_after: Duration,
}

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Errors raised by the GATT transport layer
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Bluetooth adapter not available: {reason}")]
    AdapterUnavailable { reason: String },

    #[error("Bluetooth adapter does not support Low Energy peripheral mode")]
    LowEnergyUnsupported,

    #[error("Bluetooth radio is switched off")]
    RadioOff,

    #[error("Failed to create GATT service: {reason}")]
    ServiceCreation { reason: String },

    #[error("Failed to create characteristic {characteristic}: {reason}")]
    CharacteristicCreation {
        characteristic: String,
        reason: String,
    },

    #[error("GATT service validation failed: {reason}")]
    Validation { reason: String },

    /// The platform handed back a service whose advertisement is in a state
    /// that cannot be started; a rebuilt service may come up clean
    #[error("GATT service validation failed: advertisement status {status} does not allow starting")]
    AdvertisementNotStartable { status: AdvertisementStatus },

    #[error("GATT service health check failed: {reason}")]
    HealthCheck { reason: String },

    #[error("Advertisement start failed on attempt {attempt}: {reason}")]
    AdvertisementStart { attempt: u32, reason: String },

    #[error("Advertisement was aborted by the Bluetooth stack")]
    AdvertisementAborted,

    #[error("Advertisement did not start within {}ms (last status: {last_status})", timeout.as_millis())]
    AdvertisementTimeout {
        timeout: Duration,
        last_status: AdvertisementStatus,
    },

    #[error("Advertisement failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<BlehidError>,
    },

    #[error("Notification to device {device_id} failed: {reason}")]
    NotifyFailed { device_id: DeviceId, reason: String },

    #[error("Transport is not running (state: {state})")]
    NotRunning { state: String },

    #[error("Device {device_id} has no active subscription")]
    DeviceNotSubscribed { device_id: DeviceId },

    #[error("Bluetooth platform error: {0}")]
    Platform(String),
}

impl TransportError {
    /// Whether retrying the same operation may succeed without intervention
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::AdapterUnavailable { .. }
            | TransportError::LowEnergyUnsupported
            | TransportError::RadioOff
            | TransportError::CharacteristicCreation { .. }
            | TransportError::Validation { .. }
            | TransportError::NotRunning { .. }
            | TransportError::DeviceNotSubscribed { .. } => false,
            TransportError::ServiceCreation { .. }
            | TransportError::HealthCheck { .. }
            | TransportError::AdvertisementNotStartable { .. }
            | TransportError::AdvertisementStart { .. }
            | TransportError::AdvertisementAborted
            | TransportError::AdvertisementTimeout { .. }
            | TransportError::NotifyFailed { .. }
            | TransportError::Platform(_) => true,
            TransportError::RetriesExhausted { last_error, .. } => last_error.is_retryable(),
        }
    }

    /// Recommended operator actions for this error
    pub fn remediation(&self) -> Vec<&'static str> {
        match self {
            TransportError::AdapterUnavailable { .. } => vec![
                "Check that a Bluetooth adapter is attached and recognised by the OS",
                "Make sure the bluetoothd service is running",
                "Run with permissions to access BlueZ (e.g. membership of the bluetooth group)",
            ],
            TransportError::LowEnergyUnsupported => vec![
                "Use a Bluetooth 4.0+ adapter that supports LE peripheral mode",
                "Enable experimental features in bluetoothd if the adapter requires them",
            ],
            TransportError::RadioOff => vec![
                "Enable the Bluetooth radio (e.g. `bluetoothctl power on`)",
                "Check that the radio is not blocked by rfkill",
            ],
            TransportError::AdvertisementAborted
            | TransportError::AdvertisementNotStartable { .. }
            | TransportError::AdvertisementTimeout { .. }
            | TransportError::AdvertisementStart { .. } => vec![
                "Stop other applications that advertise on the same adapter",
                "Restart the Bluetooth service and try again",
            ],
            TransportError::RetriesExhausted { last_error, .. } => match last_error.as_ref() {
                BlehidError::Transport(inner) => inner.remediation(),
                _ => vec!["Restart the Bluetooth service and try again"],
            },
            TransportError::ServiceCreation { .. }
            | TransportError::CharacteristicCreation { .. }
            | TransportError::Validation { .. }
            | TransportError::HealthCheck { .. } => vec![
                "Check that no other GATT application registers the HID service",
                "Run with permissions to register GATT applications",
            ],
            TransportError::NotRunning { .. } => vec!["Start the transport before sending reports"],
            TransportError::NotifyFailed { .. }
            | TransportError::DeviceNotSubscribed { .. }
            | TransportError::Platform(_) => Vec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Main error type for the BLE HID bridge
#[derive(Debug, Clone, Error)]
pub enum BlehidError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Input processing error: {reason}")]
    Input { reason: String },

    #[error("Advertisement manager error: {reason}")]
    Advertisement { reason: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl BlehidError {
    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        BlehidError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an advertisement manager error
    pub fn advertisement(reason: impl Into<String>) -> Self {
        BlehidError::Advertisement {
            reason: reason.into(),
        }
    }

    /// Create a platform transport error
    pub fn platform(reason: impl Into<String>) -> Self {
        BlehidError::Transport(TransportError::Platform(reason.into()))
    }

    /// Whether retrying the same operation may succeed without intervention
    pub fn is_retryable(&self) -> bool {
        match self {
            BlehidError::Transport(err) => err.is_retryable(),
            BlehidError::CircuitOpen(_) => true,
            BlehidError::Configuration { .. }
            | BlehidError::Input { .. }
            | BlehidError::Advertisement { .. }
            | BlehidError::Cancelled => false,
        }
    }

    /// Recommended operator actions for this error
    pub fn remediation(&self) -> Vec<&'static str> {
        match self {
            BlehidError::Transport(err) => err.remediation(),
            BlehidError::CircuitOpen(_) => vec![
                "Wait for the circuit breaker recovery timeout to elapse",
                "Check the Bluetooth adapter health before retrying",
            ],
            BlehidError::Configuration { .. } => vec!["Fix the configuration file and restart"],
            _ => Vec::new(),
        }
    }
}

/// Result type for bridge operations
pub type BlehidResult<T> = std::result::Result<T, BlehidError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
