//! GATT provider abstraction
//!
//! [`GattPlatform`] creates [`GattService`] objects; a service hosts
//! characteristics, advertises itself and reports subscription, read and
//! write activity to registered event handlers.
//!
//! Backends:
//! - [`bluez`]: BlueZ GATT server and advertising via `bluer` (Linux)
//! - [`simulated`]: in-memory provider with scriptable failures
//! - [`probe`]: `btleplug` adapter presence probe

#[cfg(target_os = "linux")]
pub mod bluez;
mod handlers;
pub mod probe;
pub mod simulated;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use blehid_core::advertisement::AdvertisementConfig;
use blehid_core::{AdapterProbe, AdvertisementStatus, BlehidResult, DeviceId, TransportConfig};

pub use handlers::EventHandlers;

// ----------------------------------------------------------------------------
// Parameters
// ----------------------------------------------------------------------------

/// Definition of a characteristic hosted by a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicParameters {
    pub uuid: Uuid,
    pub read: bool,
    pub notify: bool,
    pub write_without_response: bool,
    /// Value served to reads until replaced through `set_value`
    pub initial_value: Option<Vec<u8>>,
    pub description: &'static str,
}

impl CharacteristicParameters {
    pub fn new(uuid: Uuid, description: &'static str) -> Self {
        Self {
            uuid,
            read: false,
            notify: false,
            write_without_response: false,
            initial_value: None,
            description,
        }
    }

    pub fn readable(mut self) -> Self {
        self.read = true;
        self
    }

    pub fn notifying(mut self) -> Self {
        self.notify = true;
        self
    }

    pub fn writable_without_response(mut self) -> Self {
        self.write_without_response = true;
        self
    }

    pub fn with_value(mut self, value: Vec<u8>) -> Self {
        self.initial_value = Some(value);
        self
    }
}

/// Parameters handed to the platform when advertising starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingParameters {
    pub device_name: String,
    pub service_uuids: Vec<Uuid>,
    pub interval: Duration,
    pub tx_power_dbm: i16,
    pub appearance: u16,
    pub connectable: bool,
    pub discoverable: bool,
}

impl From<&TransportConfig> for AdvertisingParameters {
    fn from(config: &TransportConfig) -> Self {
        Self {
            device_name: config.device_name.clone(),
            service_uuids: vec![config.service_uuid],
            interval: config.advertising_interval(),
            tx_power_dbm: config.tx_power_dbm,
            appearance: config.appearance,
            connectable: true,
            discoverable: true,
        }
    }
}

impl From<&AdvertisementConfig> for AdvertisingParameters {
    fn from(config: &AdvertisementConfig) -> Self {
        Self {
            device_name: config.device_name.clone(),
            service_uuids: config.service_uuids.clone(),
            interval: config.interval(),
            tx_power_dbm: config.tx_power_dbm,
            appearance: config.appearance,
            connectable: config.connectable,
            discoverable: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// A central subscribed to a notifying characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribedClient {
    /// Session identifier assigned by the provider
    pub session_id: DeviceId,
    pub name: Option<String>,
    pub address: Option<String>,
    pub authenticated: bool,
    pub encrypted: bool,
}

impl SubscribedClient {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: DeviceId::new(session_id),
            name: None,
            address: None,
            authenticated: false,
            encrypted: false,
        }
    }
}

/// Activity reported by a GATT service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattServiceEvent {
    /// Full snapshot of the subscribers of `characteristic`
    SubscribedClientsChanged {
        characteristic: Uuid,
        clients: Vec<SubscribedClient>,
    },
    ReadRequested {
        characteristic: Uuid,
        client: Option<DeviceId>,
    },
    WriteRequested {
        characteristic: Uuid,
        client: Option<DeviceId>,
        value: Vec<u8>,
    },
}

/// Registration returned by [`GattService::register_event_handler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(pub u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Provider Traits
// ----------------------------------------------------------------------------

/// A platform GATT service object
#[async_trait]
pub trait GattService: Send + Sync {
    fn uuid(&self) -> Uuid;

    async fn create_characteristic(&self, parameters: CharacteristicParameters) -> BlehidResult<()>;

    fn characteristics(&self) -> Vec<CharacteristicParameters>;

    fn advertisement_status(&self) -> AdvertisementStatus;

    /// Request advertising; completion is observed through
    /// [`GattService::advertisement_status`]
    async fn start_advertising(&self, parameters: &AdvertisingParameters) -> BlehidResult<()>;

    async fn stop_advertising(&self) -> BlehidResult<()>;

    /// Replace the value served to reads of `characteristic`
    async fn set_value(&self, characteristic: Uuid, value: Vec<u8>) -> BlehidResult<()>;

    /// Notify one subscribed client
    async fn notify(&self, characteristic: Uuid, client: &DeviceId, value: &[u8]) -> BlehidResult<()>;

    fn subscribed_clients(&self, characteristic: Uuid) -> Vec<SubscribedClient>;

    fn register_event_handler(&self, sink: mpsc::UnboundedSender<GattServiceEvent>) -> HandlerId;

    fn unregister_event_handler(&self, id: HandlerId) -> bool;

    fn handler_count(&self) -> usize;

    /// Release the platform object; the service is unusable afterwards
    async fn close(&self) -> BlehidResult<()>;
}

/// Factory for platform GATT services
#[async_trait]
pub trait GattPlatform: AdapterProbe {
    fn name(&self) -> &'static str;

    async fn create_service(&self, uuid: Uuid) -> BlehidResult<Arc<dyn GattService>>;
}
