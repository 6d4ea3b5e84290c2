//! Shared types for the BLE HID bridge

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Milliseconds since the UNIX epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed between `earlier` and `self`, saturating at zero
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Device Identity
// ----------------------------------------------------------------------------

/// Opaque identifier of a connected central (GATT session id)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Connection state of a tracked central
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceConnectionState {
    Connected,
    Disconnected,
}

impl fmt::Display for DeviceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceConnectionState::Connected => f.write_str("Connected"),
            DeviceConnectionState::Disconnected => f.write_str("Disconnected"),
        }
    }
}

/// A central device subscribed to the HID Report characteristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedDevice {
    /// Session identifier assigned by the GATT provider
    pub id: DeviceId,
    /// Human-readable name
    pub name: String,
    /// Bluetooth address, when the provider exposes it
    pub address: Option<String>,
    /// Current connection state
    pub state: DeviceConnectionState,
    /// Whether the link is authenticated
    pub authenticated: bool,
    /// Whether the link is encrypted
    pub encrypted: bool,
    /// Last known signal strength in dBm
    pub rssi: Option<i16>,
    /// When the subscription first appeared
    pub connected_at: Timestamp,
    /// Last time a report was delivered or a request was served
    pub last_activity: Timestamp,
    /// Number of reports successfully delivered
    pub reports_delivered: u64,
    /// Free-form metadata (host commands, provider details)
    pub metadata: BTreeMap<String, String>,
}

impl ConnectedDevice {
    /// Create a newly connected device
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            name: name.into(),
            address: None,
            state: DeviceConnectionState::Connected,
            authenticated: false,
            encrypted: false,
            rssi: None,
            connected_at: now,
            last_activity: now,
            reports_delivered: 0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == DeviceConnectionState::Connected
    }

    /// Record activity on this device
    pub fn touch(&mut self) {
        self.last_activity = Timestamp::now();
    }

    /// Record a successful report delivery
    pub fn record_delivery(&mut self) {
        self.reports_delivered = self.reports_delivered.saturating_add(1);
        self.touch();
    }

    pub fn mark_disconnected(&mut self) {
        self.state = DeviceConnectionState::Disconnected;
    }
}

// ----------------------------------------------------------------------------
// Transport and Advertisement State
// ----------------------------------------------------------------------------

/// Lifecycle state of the GATT transport service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for TransportServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportServiceState::Stopped => "Stopped",
            TransportServiceState::Starting => "Starting",
            TransportServiceState::Running => "Running",
            TransportServiceState::Stopping => "Stopping",
        };
        f.write_str(name)
    }
}

/// Advertisement status reported by the GATT provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdvertisementStatus {
    /// Service object created, never advertised
    Created,
    /// Start requested, not yet confirmed by the stack
    Starting,
    Started,
    Stopped,
    /// The stack gave up; the service object must be recreated
    Aborted,
}

impl AdvertisementStatus {
    /// Whether advertising may be started from this status
    pub fn is_startable(&self) -> bool {
        matches!(self, AdvertisementStatus::Created | AdvertisementStatus::Stopped)
    }
}

impl fmt::Display for AdvertisementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdvertisementStatus::Created => "Created",
            AdvertisementStatus::Starting => "Starting",
            AdvertisementStatus::Started => "Started",
            AdvertisementStatus::Stopped => "Stopped",
            AdvertisementStatus::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// Snapshot of the local Bluetooth adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub present: bool,
    pub low_energy_supported: bool,
    pub powered: bool,
    pub name: Option<String>,
    pub address: Option<String>,
}

impl AdapterStatus {
    /// Status used when no adapter could be found
    pub fn missing() -> Self {
        Self {
            present: false,
            low_energy_supported: false,
            powered: false,
            name: None,
            address: None,
        }
    }

    /// Whether the adapter can host the HID peripheral
    pub fn is_usable(&self) -> bool {
        self.present && self.low_energy_supported && self.powered
    }

    /// Short description used in metrics and logs
    pub fn summary(&self) -> String {
        if !self.present {
            "missing".to_string()
        } else if !self.low_energy_supported {
            "no-le".to_string()
        } else if !self.powered {
            "powered-off".to_string()
        } else {
            "ready".to_string()
        }
    }
}

// ----------------------------------------------------------------------------
// HID Reports
// ----------------------------------------------------------------------------

/// HID report type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportType {
    Input,
    Output,
    Feature,
}

/// Input device that produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputSource {
    Keyboard,
    Mouse,
    Consumer,
    System,
}

/// A HID report ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidReport {
    pub report_id: u8,
    pub report_type: ReportType,
    pub data: Vec<u8>,
    pub timestamp: Timestamp,
    pub source: InputSource,
}

impl HidReport {
    /// Create an input report
    pub fn input(report_id: u8, data: Vec<u8>, source: InputSource) -> Self {
        Self {
            report_id,
            report_type: ReportType::Input,
            data,
            timestamp: Timestamp::now(),
            source,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Hex dump of the payload for logging
    pub fn to_hex(&self) -> String {
        hex::encode(&self.data)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
