//! BlueZ GATT provider using bluer
//!
//! Characteristics are collected as they are created and registered with
//! BlueZ as one GATT application when advertising first starts. BlueZ does not
//! tell a notify session which central opened it, so every notify session gets
//! its own identifier and lives until the central unsubscribes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicReadRequest, CharacteristicWrite,
    CharacteristicWriteMethod, CharacteristicWriteRequest, Service,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blehid_core::{
    AdapterProbe, AdapterStatus, AdvertisementStatus, BlehidError, BlehidResult, DeviceId,
    TransportError,
};

use super::{
    AdvertisingParameters, CharacteristicParameters, EventHandlers, GattPlatform, GattService,
    GattServiceEvent, HandlerId, SubscribedClient,
};

/// How often a notify session is checked for unsubscription
const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ----------------------------------------------------------------------------
// Platform
// ----------------------------------------------------------------------------

/// GATT platform backed by the BlueZ daemon
pub struct BluezPlatform {
    _session: bluer::Session,
    adapter: bluer::Adapter,
}

impl BluezPlatform {
    /// Connect to BlueZ and select `adapter_name` or the default adapter
    pub async fn new(adapter_name: Option<&str>) -> BlehidResult<Self> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| TransportError::AdapterUnavailable {
                reason: format!("BlueZ session: {}", e),
            })?;

        let adapter = match adapter_name {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| TransportError::AdapterUnavailable {
            reason: format!("BLE adapter: {}", e),
        })?;

        info!("Using BlueZ adapter {}", adapter.name());
        Ok(Self {
            _session: session,
            adapter,
        })
    }
}

#[async_trait]
impl AdapterProbe for BluezPlatform {
    async fn adapter_status(&self) -> BlehidResult<AdapterStatus> {
        let powered = self
            .adapter
            .is_powered()
            .await
            .map_err(|e| BlehidError::platform(format!("Failed to read adapter power: {}", e)))?;
        let low_energy_supported = self.adapter.supported_advertising_instances().await.is_ok();
        let address = self.adapter.address().await.ok().map(|a| a.to_string());

        Ok(AdapterStatus {
            present: true,
            low_energy_supported,
            powered,
            name: Some(self.adapter.name().to_string()),
            address,
        })
    }
}

#[async_trait]
impl GattPlatform for BluezPlatform {
    fn name(&self) -> &'static str {
        "bluez"
    }

    async fn create_service(&self, uuid: Uuid) -> BlehidResult<Arc<dyn GattService>> {
        debug!("Creating BlueZ service {}", uuid);
        Ok(Arc::new(BluezService::new(self.adapter.clone(), uuid)))
    }
}

// ----------------------------------------------------------------------------
// Service
// ----------------------------------------------------------------------------

struct NotifySession {
    client: SubscribedClient,
    notifier: Arc<tokio::sync::Mutex<CharacteristicNotifier>>,
}

/// State shared with the callbacks registered in BlueZ
#[derive(Default)]
struct Shared {
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    sessions: Mutex<BTreeMap<Uuid, BTreeMap<DeviceId, NotifySession>>>,
    handlers: EventHandlers,
    next_session: AtomicU64,
}

impl Shared {
    fn value(&self, characteristic: &Uuid) -> Vec<u8> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(characteristic)
            .cloned()
            .unwrap_or_default()
    }

    fn clients(&self, characteristic: &Uuid) -> Vec<SubscribedClient> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(characteristic)
            .map(|sessions| sessions.values().map(|s| s.client.clone()).collect())
            .unwrap_or_default()
    }

    fn notifier(
        &self,
        characteristic: &Uuid,
        client: &DeviceId,
    ) -> Option<Arc<tokio::sync::Mutex<CharacteristicNotifier>>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(characteristic)
            .and_then(|sessions| sessions.get(client))
            .map(|session| Arc::clone(&session.notifier))
    }

    fn open_session(&self, characteristic: Uuid, notifier: CharacteristicNotifier) -> DeviceId {
        let id = DeviceId::new(format!(
            "bluez-session-{}",
            self.next_session.fetch_add(1, Ordering::Relaxed) + 1
        ));
        let client = SubscribedClient::new(id.as_str());

        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(characteristic)
            .or_default()
            .insert(
                id.clone(),
                NotifySession {
                    client,
                    notifier: Arc::new(tokio::sync::Mutex::new(notifier)),
                },
            );
        self.emit_clients(characteristic);
        id
    }

    fn close_session(&self, characteristic: Uuid, id: &DeviceId) {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&characteristic)
            .and_then(|sessions| sessions.remove(id))
            .is_some();
        if removed {
            self.emit_clients(characteristic);
        }
    }

    fn emit_clients(&self, characteristic: Uuid) {
        self.handlers.emit(GattServiceEvent::SubscribedClientsChanged {
            characteristic,
            clients: self.clients(&characteristic),
        });
    }
}

/// A HID service registered with BlueZ
pub struct BluezService {
    uuid: Uuid,
    adapter: bluer::Adapter,
    shared: Arc<Shared>,
    characteristics: Mutex<Vec<CharacteristicParameters>>,
    status: Mutex<AdvertisementStatus>,
    application: tokio::sync::Mutex<Option<ApplicationHandle>>,
    advertisement: tokio::sync::Mutex<Option<AdvertisementHandle>>,
    closed: AtomicBool,
}

impl BluezService {
    fn new(adapter: bluer::Adapter, uuid: Uuid) -> Self {
        Self {
            uuid,
            adapter,
            shared: Arc::new(Shared::default()),
            characteristics: Mutex::new(Vec::new()),
            status: Mutex::new(AdvertisementStatus::Created),
            application: tokio::sync::Mutex::new(None),
            advertisement: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn set_status(&self, status: AdvertisementStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn ensure_open(&self) -> BlehidResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BlehidError::platform("service object has been closed"));
        }
        Ok(())
    }

    fn build_characteristic(&self, parameters: &CharacteristicParameters) -> Characteristic {
        let uuid = parameters.uuid;
        let mut characteristic = Characteristic {
            uuid,
            ..Default::default()
        };

        if parameters.read {
            let shared = Arc::clone(&self.shared);
            characteristic.read = Some(CharacteristicRead {
                read: true,
                fun: Box::new(move |req: CharacteristicReadRequest| {
                    let shared = Arc::clone(&shared);
                    Box::pin(async move {
                        debug!("Read of {} from {} (offset {})", uuid, req.device_address, req.offset);
                        shared.handlers.emit(GattServiceEvent::ReadRequested {
                            characteristic: uuid,
                            client: None,
                        });
                        let value = shared.value(&uuid);
                        Ok(value.get(req.offset as usize..).map(<[u8]>::to_vec).unwrap_or_default())
                    })
                }),
                ..Default::default()
            });
        }

        if parameters.write_without_response {
            let shared = Arc::clone(&self.shared);
            characteristic.write = Some(CharacteristicWrite {
                write_without_response: true,
                method: CharacteristicWriteMethod::Fun(Box::new(
                    move |value: Vec<u8>, req: CharacteristicWriteRequest| {
                        let shared = Arc::clone(&shared);
                        Box::pin(async move {
                            debug!("Write to {} from {}: {}", uuid, req.device_address, hex::encode(&value));
                            shared.handlers.emit(GattServiceEvent::WriteRequested {
                                characteristic: uuid,
                                client: None,
                                value,
                            });
                            Ok(())
                        })
                    },
                )),
                ..Default::default()
            });
        }

        if parameters.notify {
            let shared = Arc::clone(&self.shared);
            characteristic.notify = Some(CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    let shared = Arc::clone(&shared);
                    Box::pin(async move {
                        let id = shared.open_session(uuid, notifier);
                        info!("Notify session {} opened on {}", id, uuid);
                        loop {
                            tokio::time::sleep(SESSION_POLL_INTERVAL).await;
                            let Some(notifier) = shared.notifier(&uuid, &id) else {
                                break;
                            };
                            if notifier.lock().await.is_stopped() {
                                break;
                            }
                        }
                        shared.close_session(uuid, &id);
                        info!("Notify session {} closed on {}", id, uuid);
                    })
                })),
                ..Default::default()
            });
        }

        characteristic
    }

    async fn register_application(&self) -> BlehidResult<()> {
        let mut application = self.application.lock().await;
        if application.is_some() {
            return Ok(());
        }

        let characteristics = self
            .characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let app = Application {
            services: vec![Service {
                uuid: self.uuid,
                primary: true,
                characteristics: characteristics
                    .iter()
                    .map(|parameters| self.build_characteristic(parameters))
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let handle = self
            .adapter
            .serve_gatt_application(app)
            .await
            .map_err(|e| TransportError::ServiceCreation {
                reason: format!("Failed to register GATT application: {}", e),
            })?;
        *application = Some(handle);
        info!("Registered GATT application for service {}", self.uuid);
        Ok(())
    }
}

#[async_trait]
impl GattService for BluezService {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn create_characteristic(&self, parameters: CharacteristicParameters) -> BlehidResult<()> {
        self.ensure_open()?;
        if self.application.lock().await.is_some() {
            return Err(TransportError::CharacteristicCreation {
                characteristic: parameters.uuid.to_string(),
                reason: "GATT application already registered".to_string(),
            }
            .into());
        }

        if let Some(value) = &parameters.initial_value {
            self.shared
                .values
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(parameters.uuid, value.clone());
        }
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(parameters);
        Ok(())
    }

    fn characteristics(&self) -> Vec<CharacteristicParameters> {
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn advertisement_status(&self) -> AdvertisementStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn start_advertising(&self, parameters: &AdvertisingParameters) -> BlehidResult<()> {
        self.ensure_open()?;
        self.set_status(AdvertisementStatus::Starting);

        if let Err(e) = self.register_application().await {
            self.set_status(AdvertisementStatus::Aborted);
            return Err(e);
        }

        let advertisement = Advertisement {
            advertisement_type: AdvertisementType::Peripheral,
            service_uuids: parameters.service_uuids.iter().copied().collect(),
            local_name: Some(parameters.device_name.clone()),
            appearance: Some(parameters.appearance),
            discoverable: Some(parameters.discoverable),
            min_interval: Some(parameters.interval),
            max_interval: Some(parameters.interval),
            tx_power: Some(parameters.tx_power_dbm),
            ..Default::default()
        };

        match self.adapter.advertise(advertisement).await {
            Ok(handle) => {
                *self.advertisement.lock().await = Some(handle);
                self.set_status(AdvertisementStatus::Started);
                info!("Started BLE advertising as '{}'", parameters.device_name);
                Ok(())
            }
            Err(e) => {
                self.set_status(AdvertisementStatus::Aborted);
                Err(BlehidError::platform(format!("Failed to start advertising: {}", e)))
            }
        }
    }

    async fn stop_advertising(&self) -> BlehidResult<()> {
        // Dropping the handle unregisters the advertisement
        if self.advertisement.lock().await.take().is_some() {
            info!("Stopped BLE advertising");
        }
        self.set_status(AdvertisementStatus::Stopped);
        Ok(())
    }

    async fn set_value(&self, characteristic: Uuid, value: Vec<u8>) -> BlehidResult<()> {
        self.ensure_open()?;
        self.shared
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(characteristic, value);
        Ok(())
    }

    async fn notify(&self, characteristic: Uuid, client: &DeviceId, value: &[u8]) -> BlehidResult<()> {
        self.ensure_open()?;
        let notifier = self.shared.notifier(&characteristic, client).ok_or_else(|| {
            TransportError::DeviceNotSubscribed {
                device_id: client.clone(),
            }
        })?;

        let mut notifier = notifier.lock().await;
        notifier
            .notify(value.to_vec())
            .await
            .map_err(|e| TransportError::NotifyFailed {
                device_id: client.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn subscribed_clients(&self, characteristic: Uuid) -> Vec<SubscribedClient> {
        self.shared.clients(&characteristic)
    }

    fn register_event_handler(&self, sink: mpsc::UnboundedSender<GattServiceEvent>) -> HandlerId {
        self.shared.handlers.register(sink)
    }

    fn unregister_event_handler(&self, id: HandlerId) -> bool {
        self.shared.handlers.unregister(id)
    }

    fn handler_count(&self) -> usize {
        self.shared.handlers.len()
    }

    async fn close(&self) -> BlehidResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.stop_advertising().await {
            warn!("Failed to stop advertising while closing: {}", e);
        }
        self.application.lock().await.take();
        self.shared.handlers.clear();
        self.shared
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("Closed BlueZ service {}", self.uuid);
        Ok(())
    }
}
