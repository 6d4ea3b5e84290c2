//! In-memory GATT provider
//!
//! Behaves like a GATT stack without a radio: services keep their
//! characteristics and values in memory, advertising follows a scripted
//! sequence of outcomes and clients are attached by calling
//! [`SimulatedService::connect_client`]. Used by `blehid run --simulate` and the
//! transport tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use blehid_core::{
    AdapterProbe, AdapterStatus, AdvertisementStatus, BlehidError, BlehidResult, DeviceId,
    TransportError,
};

use super::{
    AdvertisingParameters, CharacteristicParameters, EventHandlers, GattPlatform, GattService,
    GattServiceEvent, HandlerId, SubscribedClient,
};
use crate::protocol::REPORT_CHARACTERISTIC_UUID;

// ----------------------------------------------------------------------------
// Script
// ----------------------------------------------------------------------------

/// What the simulated stack does with one advertising request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertisingOutcome {
    /// Status flips to `Started` immediately
    Started,
    /// Status stays `Starting` for the given time, then flips to `Started`
    StartedAfter(Duration),
    /// Status flips to `Aborted`
    Aborted,
    /// Status stays `Starting` forever
    Hang,
    /// Status passes through `Starting` and settles on `Stopped`
    SettleStopped(Duration),
    /// The request itself fails
    Error(String),
}

/// Failure injection for the simulated provider
#[derive(Debug, Default)]
pub struct SimulationScript {
    /// Number of upcoming `create_service` calls that fail
    pub fail_service_creation: u32,
    /// Characteristic whose creation fails
    pub fail_characteristic: Option<Uuid>,
    /// Outcomes consumed by successive advertising requests; `Started` when empty
    pub advertising: VecDeque<AdvertisingOutcome>,
    /// Clients whose notifications fail
    pub notify_failures: HashSet<DeviceId>,
    /// Advertisement status of successive new services; `Created` when empty
    pub initial_statuses: VecDeque<AdvertisementStatus>,
    /// Time each adapter status query takes
    pub adapter_delay: Option<Duration>,
}

// ----------------------------------------------------------------------------
// Platform
// ----------------------------------------------------------------------------

/// Simulated GATT platform
#[derive(Debug)]
pub struct SimulatedPlatform {
    adapter: Mutex<AdapterStatus>,
    script: Arc<Mutex<SimulationScript>>,
    services: Mutex<Vec<Arc<SimulatedService>>>,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlatform {
    /// Platform with a present, LE-capable, powered adapter
    pub fn new() -> Self {
        Self {
            adapter: Mutex::new(AdapterStatus {
                present: true,
                low_energy_supported: true,
                powered: true,
                name: Some("sim0".to_string()),
                address: Some("00:00:00:00:00:00".to_string()),
            }),
            script: Arc::new(Mutex::new(SimulationScript::default())),
            services: Mutex::new(Vec::new()),
        }
    }

    pub fn set_adapter_status(&self, status: AdapterStatus) {
        *self.adapter.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Edit the failure script
    pub fn script<R>(&self, edit: impl FnOnce(&mut SimulationScript) -> R) -> R {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        edit(&mut script)
    }

    /// Queue the outcome of an upcoming advertising request
    pub fn push_advertising_outcome(&self, outcome: AdvertisingOutcome) {
        self.script(|script| script.advertising.push_back(outcome));
    }

    /// Number of service objects created so far
    pub fn services_created(&self) -> usize {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Most recently created service that has not been closed
    pub fn current_service(&self) -> Option<Arc<SimulatedService>> {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|service| !service.is_closed())
            .cloned()
    }
}

#[async_trait]
impl AdapterProbe for SimulatedPlatform {
    async fn adapter_status(&self) -> BlehidResult<AdapterStatus> {
        if let Some(delay) = self.script(|script| script.adapter_delay) {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .adapter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[async_trait]
impl GattPlatform for SimulatedPlatform {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn create_service(&self, uuid: Uuid) -> BlehidResult<Arc<dyn GattService>> {
        let fail = self.script(|script| {
            if script.fail_service_creation > 0 {
                script.fail_service_creation -= 1;
                true
            } else {
                false
            }
        });
        if fail {
            return Err(TransportError::ServiceCreation {
                reason: "simulated service creation failure".to_string(),
            }
            .into());
        }

        let service = Arc::new(SimulatedService::new(uuid, Arc::clone(&self.script)));
        if let Some(status) = self.script(|script| script.initial_statuses.pop_front()) {
            service.set_advertisement_status(status);
        }
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&service));
        debug!("Created simulated service {}", uuid);
        Ok(service)
    }
}

// ----------------------------------------------------------------------------
// Service
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct ServiceInner {
    status: AdvertisementStatus,
    characteristics: Vec<CharacteristicParameters>,
    values: HashMap<Uuid, Vec<u8>>,
    subscribers: BTreeMap<DeviceId, SubscribedClient>,
    notifications: Vec<(DeviceId, Vec<u8>)>,
    advertising_requests: u32,
    last_parameters: Option<AdvertisingParameters>,
    closed: bool,
}

/// Simulated GATT service object
#[derive(Debug)]
pub struct SimulatedService {
    uuid: Uuid,
    inner: Arc<Mutex<ServiceInner>>,
    handlers: EventHandlers,
    script: Arc<Mutex<SimulationScript>>,
}

impl SimulatedService {
    fn new(uuid: Uuid, script: Arc<Mutex<SimulationScript>>) -> Self {
        Self {
            uuid,
            inner: Arc::new(Mutex::new(ServiceInner {
                status: AdvertisementStatus::Created,
                characteristics: Vec::new(),
                values: HashMap::new(),
                subscribers: BTreeMap::new(),
                notifications: Vec::new(),
                advertising_requests: 0,
                last_parameters: None,
                closed: false,
            })),
            handlers: EventHandlers::new(),
            script,
        }
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut ServiceInner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    fn ensure_open(&self) -> BlehidResult<()> {
        if self.is_closed() {
            return Err(BlehidError::platform("service object has been closed"));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.with_inner(|inner| inner.closed)
    }

    /// Force the advertisement status, as a misbehaving stack would
    pub fn set_advertisement_status(&self, status: AdvertisementStatus) {
        self.with_inner(|inner| inner.status = status);
    }

    pub fn advertising_requests(&self) -> u32 {
        self.with_inner(|inner| inner.advertising_requests)
    }

    pub fn last_advertising_parameters(&self) -> Option<AdvertisingParameters> {
        self.with_inner(|inner| inner.last_parameters.clone())
    }

    /// Subscribe a client to the Report characteristic
    pub fn connect_client(&self, client: SubscribedClient) {
        let clients = self.with_inner(|inner| {
            inner.subscribers.insert(client.session_id.clone(), client);
            inner.subscribers.values().cloned().collect::<Vec<_>>()
        });
        self.handlers.emit(GattServiceEvent::SubscribedClientsChanged {
            characteristic: REPORT_CHARACTERISTIC_UUID,
            clients,
        });
    }

    /// Remove a client's Report subscription
    pub fn disconnect_client(&self, session_id: &DeviceId) {
        let clients = self.with_inner(|inner| {
            inner.subscribers.remove(session_id);
            inner.subscribers.values().cloned().collect::<Vec<_>>()
        });
        self.handlers.emit(GattServiceEvent::SubscribedClientsChanged {
            characteristic: REPORT_CHARACTERISTIC_UUID,
            clients,
        });
    }

    /// Serve a read request from `client`
    pub fn read(&self, characteristic: Uuid, client: Option<DeviceId>) -> Option<Vec<u8>> {
        let value = self.with_inner(|inner| inner.values.get(&characteristic).cloned());
        self.handlers.emit(GattServiceEvent::ReadRequested {
            characteristic,
            client,
        });
        value
    }

    /// Deliver a write request from `client`
    pub fn write(&self, characteristic: Uuid, client: Option<DeviceId>, value: Vec<u8>) {
        self.handlers.emit(GattServiceEvent::WriteRequested {
            characteristic,
            client,
            value,
        });
    }

    /// Notifications delivered so far, in order
    pub fn notifications(&self) -> Vec<(DeviceId, Vec<u8>)> {
        self.with_inner(|inner| inner.notifications.clone())
    }

    pub fn value(&self, characteristic: Uuid) -> Option<Vec<u8>> {
        self.with_inner(|inner| inner.values.get(&characteristic).cloned())
    }

    fn settle_later(&self, delay: Duration, settled: AdvertisementStatus) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.status == AdvertisementStatus::Starting {
                inner.status = settled;
            }
        });
    }
}

#[async_trait]
impl GattService for SimulatedService {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn create_characteristic(&self, parameters: CharacteristicParameters) -> BlehidResult<()> {
        self.ensure_open()?;
        let fail = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_characteristic
            == Some(parameters.uuid);
        if fail {
            return Err(TransportError::CharacteristicCreation {
                characteristic: parameters.uuid.to_string(),
                reason: "simulated characteristic failure".to_string(),
            }
            .into());
        }

        self.with_inner(|inner| {
            if let Some(value) = &parameters.initial_value {
                inner.values.insert(parameters.uuid, value.clone());
            }
            inner.characteristics.push(parameters);
        });
        Ok(())
    }

    fn characteristics(&self) -> Vec<CharacteristicParameters> {
        self.with_inner(|inner| inner.characteristics.clone())
    }

    fn advertisement_status(&self) -> AdvertisementStatus {
        self.with_inner(|inner| inner.status)
    }

    async fn start_advertising(&self, parameters: &AdvertisingParameters) -> BlehidResult<()> {
        self.ensure_open()?;
        let outcome = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .advertising
            .pop_front()
            .unwrap_or(AdvertisingOutcome::Started);

        self.with_inner(|inner| {
            inner.advertising_requests += 1;
            inner.last_parameters = Some(parameters.clone());
        });
        info!(
            "Simulated advertising request for '{}': {:?}",
            parameters.device_name, outcome
        );

        match outcome {
            AdvertisingOutcome::Error(reason) => {
                return Err(BlehidError::platform(reason));
            }
            AdvertisingOutcome::Started => {
                self.set_advertisement_status(AdvertisementStatus::Started);
            }
            AdvertisingOutcome::Aborted => {
                self.set_advertisement_status(AdvertisementStatus::Aborted);
            }
            AdvertisingOutcome::Hang => {
                self.set_advertisement_status(AdvertisementStatus::Starting);
            }
            AdvertisingOutcome::StartedAfter(delay) => {
                self.set_advertisement_status(AdvertisementStatus::Starting);
                self.settle_later(delay, AdvertisementStatus::Started);
            }
            AdvertisingOutcome::SettleStopped(delay) => {
                self.set_advertisement_status(AdvertisementStatus::Starting);
                self.settle_later(delay, AdvertisementStatus::Stopped);
            }
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> BlehidResult<()> {
        self.ensure_open()?;
        self.set_advertisement_status(AdvertisementStatus::Stopped);
        Ok(())
    }

    async fn set_value(&self, characteristic: Uuid, value: Vec<u8>) -> BlehidResult<()> {
        self.ensure_open()?;
        self.with_inner(|inner| {
            inner.values.insert(characteristic, value);
        });
        Ok(())
    }

    async fn notify(&self, characteristic: Uuid, client: &DeviceId, value: &[u8]) -> BlehidResult<()> {
        self.ensure_open()?;
        let failing = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .notify_failures
            .contains(client);
        if failing {
            return Err(TransportError::NotifyFailed {
                device_id: client.clone(),
                reason: "simulated notification failure".to_string(),
            }
            .into());
        }

        self.with_inner(|inner| {
            if characteristic != REPORT_CHARACTERISTIC_UUID || !inner.subscribers.contains_key(client) {
                return Err(BlehidError::from(TransportError::DeviceNotSubscribed {
                    device_id: client.clone(),
                }));
            }
            inner.notifications.push((client.clone(), value.to_vec()));
            Ok(())
        })
    }

    fn subscribed_clients(&self, characteristic: Uuid) -> Vec<SubscribedClient> {
        if characteristic != REPORT_CHARACTERISTIC_UUID {
            return Vec::new();
        }
        self.with_inner(|inner| inner.subscribers.values().cloned().collect())
    }

    fn register_event_handler(&self, sink: mpsc::UnboundedSender<GattServiceEvent>) -> HandlerId {
        self.handlers.register(sink)
    }

    fn unregister_event_handler(&self, id: HandlerId) -> bool {
        self.handlers.unregister(id)
    }

    fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    async fn close(&self) -> BlehidResult<()> {
        self.handlers.clear();
        self.with_inner(|inner| {
            inner.closed = true;
            inner.subscribers.clear();
        });
        Ok(())
    }
}
