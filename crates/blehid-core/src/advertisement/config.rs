//! Advertisement parameters and validation

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{TransportConfig, HID_SERVICE_UUID};

pub const MIN_INTERVAL_MS: u64 = 20;
pub const MAX_INTERVAL_MS: u64 = 10_240;
pub const MIN_TX_POWER_DBM: i16 = -40;
pub const MAX_TX_POWER_DBM: i16 = 20;
/// Local name budget left in a legacy advertising PDU
pub const MAX_DEVICE_NAME_BYTES: usize = 29;

const DEFAULT_DEVICE_NAME: &str = "BLE HID Bridge";
const DEFAULT_INTERVAL_MS: u64 = 100;
const DEFAULT_TX_POWER_DBM: i16 = 0;

/// Parameters of the HID advertisement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisementConfig {
    pub device_name: String,
    pub service_uuids: Vec<Uuid>,
    pub interval_ms: u64,
    pub tx_power_dbm: i16,
    pub appearance: u16,
    pub connectable: bool,
    pub include_tx_power: bool,
}

impl Default for AdvertisementConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            service_uuids: vec![HID_SERVICE_UUID],
            interval_ms: DEFAULT_INTERVAL_MS,
            tx_power_dbm: DEFAULT_TX_POWER_DBM,
            appearance: 0x03C0,
            connectable: true,
            include_tx_power: false,
        }
    }
}

impl From<&TransportConfig> for AdvertisementConfig {
    fn from(config: &TransportConfig) -> Self {
        Self {
            device_name: config.device_name.clone(),
            service_uuids: vec![config.service_uuid],
            interval_ms: config.advertising_interval_ms,
            tx_power_dbm: config.tx_power_dbm,
            appearance: config.appearance,
            ..Self::default()
        }
    }
}

impl AdvertisementConfig {
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_tx_power(mut self, dbm: i16) -> Self {
        self.tx_power_dbm = dbm;
        self
    }

    pub fn with_service_uuids(mut self, uuids: Vec<Uuid>) -> Self {
        self.service_uuids = uuids;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Corrected copy of this configuration plus every correction made.
    ///
    /// Out-of-range interval and power fall back to defaults, an empty name
    /// falls back to the default name, an overlong name is truncated on a
    /// character boundary and the HID service UUID is added when missing.
    pub fn normalized(&self) -> (AdvertisementConfig, Vec<ValidationIssue>) {
        let mut config = self.clone();
        let mut issues = Vec::new();

        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&config.interval_ms) {
            issues.push(ValidationIssue::new(
                "interval_ms",
                format!(
                    "{} ms is outside {}..={} ms",
                    config.interval_ms, MIN_INTERVAL_MS, MAX_INTERVAL_MS
                ),
                DEFAULT_INTERVAL_MS,
            ));
            config.interval_ms = DEFAULT_INTERVAL_MS;
        }

        if !(MIN_TX_POWER_DBM..=MAX_TX_POWER_DBM).contains(&config.tx_power_dbm) {
            issues.push(ValidationIssue::new(
                "tx_power_dbm",
                format!(
                    "{} dBm is outside {}..={} dBm",
                    config.tx_power_dbm, MIN_TX_POWER_DBM, MAX_TX_POWER_DBM
                ),
                DEFAULT_TX_POWER_DBM,
            ));
            config.tx_power_dbm = DEFAULT_TX_POWER_DBM;
        }

        if config.device_name.trim().is_empty() {
            issues.push(ValidationIssue::new(
                "device_name",
                "device name is empty",
                DEFAULT_DEVICE_NAME,
            ));
            config.device_name = DEFAULT_DEVICE_NAME.to_string();
        } else if config.device_name.len() > MAX_DEVICE_NAME_BYTES {
            let mut end = MAX_DEVICE_NAME_BYTES;
            while !config.device_name.is_char_boundary(end) {
                end -= 1;
            }
            let truncated = config.device_name[..end].to_string();
            issues.push(ValidationIssue::new(
                "device_name",
                format!(
                    "device name is {} bytes, limit is {}",
                    config.device_name.len(),
                    MAX_DEVICE_NAME_BYTES
                ),
                &truncated,
            ));
            config.device_name = truncated;
        }

        if !config.service_uuids.contains(&HID_SERVICE_UUID) {
            issues.push(ValidationIssue::new(
                "service_uuids",
                "HID service UUID missing",
                HID_SERVICE_UUID,
            ));
            config.service_uuids.insert(0, HID_SERVICE_UUID);
        }

        (config, issues)
    }
}

/// A value corrected during validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub corrected_to: String,
}

impl ValidationIssue {
    fn new(field: &str, message: impl Into<String>, corrected_to: impl ToString) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            corrected_to: corrected_to.to_string(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (using {})", self.field, self.message, self.corrected_to)
    }
}
