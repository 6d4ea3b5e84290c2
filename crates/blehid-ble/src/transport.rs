//! GATT transport service
//!
//! Owns the HID GATT service for its whole lifetime: builds it through the
//! [`ServiceFactory`] under the circuit breaker, brings advertising up with
//! bounded retries (rebuilding the service between attempts), tracks
//! subscribed centrals and delivers reports to them.
//!
//! State machine:
//!
//! ```text
//! Stopped --start--> Starting --ok--> Running --stop--> Stopping --> Stopped
//!                       |                                               ^
//!                       +--------------- failure -----------------------+
//! ```

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use blehid_core::{
    AdvertisementStatus, BlehidError, BlehidResult, CircuitBreaker, ConnectedDevice,
    DeviceConnectionState, DeviceId, HidReport, NoopRecorder, OperationRecorder, TransportConfig,
    TransportError, TransportServiceState,
};

use crate::devices::ConnectionTable;
use crate::discovery_monitor::DiscoveryMonitor;
use crate::factory::ServiceFactory;
use crate::gatt::{
    AdvertisingParameters, GattPlatform, GattService, GattServiceEvent, HandlerId,
};
use crate::protocol::{
    characteristic_name, ControlPointCommand, HID_CONTROL_POINT_CHARACTERISTIC_UUID,
    REPORT_CHARACTERISTIC_UUID,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Device metadata key holding the last Control Point command
pub const HOST_COMMAND_METADATA_KEY: &str = "host_command";

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Events published by [`GattTransportService`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    DeviceConnected(ConnectedDevice),
    DeviceDisconnected(ConnectedDevice),
    ConnectionStateChanged {
        device_id: DeviceId,
        state: DeviceConnectionState,
    },
    AdvertisementStatusChanged {
        previous: AdvertisementStatus,
        current: AdvertisementStatus,
    },
    /// A host wrote the HID Control Point
    HostCommand {
        device_id: Option<DeviceId>,
        command: ControlPointCommand,
    },
    StateChanged {
        from: TransportServiceState,
        to: TransportServiceState,
    },
}

/// Outcome of a broadcast report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub delivered: usize,
    pub failed: usize,
    /// Deliveries refused by the open circuit breaker
    pub rejected: usize,
}

impl DeliverySummary {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed + self.rejected
    }
}

// ----------------------------------------------------------------------------
// Service Event Handling
// ----------------------------------------------------------------------------

/// Everything the event pump needs, detached from the transport
#[derive(Clone)]
struct EventContext {
    devices: Arc<ConnectionTable>,
    events: broadcast::Sender<TransportEvent>,
}

impl EventContext {
    fn publish(&self, event: TransportEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn handle(&self, event: GattServiceEvent) {
        match event {
            GattServiceEvent::SubscribedClientsChanged {
                characteristic,
                clients,
            } => {
                if characteristic != REPORT_CHARACTERISTIC_UUID {
                    debug!(
                        "Ignoring subscription change on {}",
                        characteristic_name(&characteristic)
                    );
                    return;
                }
                self.on_subscribers_changed(&clients);
            }
            GattServiceEvent::ReadRequested {
                characteristic,
                client,
            } => {
                debug!(
                    "{} read by {}",
                    characteristic_name(&characteristic),
                    client.as_ref().map(DeviceId::as_str).unwrap_or("unknown central")
                );
                if let Some(id) = client {
                    self.devices.touch(&id);
                }
            }
            GattServiceEvent::WriteRequested {
                characteristic,
                client,
                value,
            } => {
                if characteristic == HID_CONTROL_POINT_CHARACTERISTIC_UUID {
                    self.on_control_point(client, &value);
                } else {
                    debug!(
                        "Ignoring write to {}: {}",
                        characteristic_name(&characteristic),
                        hex::encode(&value)
                    );
                }
            }
        }
    }

    fn on_subscribers_changed(&self, clients: &[crate::gatt::SubscribedClient]) {
        let change = self.devices.apply_snapshot(clients);

        for device in change.connected {
            info!("Device connected: {} ({})", device.name, device.id);
            self.publish(TransportEvent::ConnectionStateChanged {
                device_id: device.id.clone(),
                state: DeviceConnectionState::Connected,
            });
            self.publish(TransportEvent::DeviceConnected(device));
        }

        for device in change.disconnected {
            info!("Device disconnected: {} ({})", device.name, device.id);
            self.publish(TransportEvent::ConnectionStateChanged {
                device_id: device.id.clone(),
                state: DeviceConnectionState::Disconnected,
            });
            self.publish(TransportEvent::DeviceDisconnected(device));
        }
    }

    fn on_control_point(&self, client: Option<DeviceId>, value: &[u8]) {
        let Some(command) = ControlPointCommand::parse(value) else {
            warn!("Ignoring unknown HID Control Point value {}", hex::encode(value));
            return;
        };

        info!(
            "Host command {} from {}",
            command.as_str(),
            client.as_ref().map(DeviceId::as_str).unwrap_or("unknown central")
        );
        if let Some(id) = &client {
            self.devices
                .set_metadata(id, HOST_COMMAND_METADATA_KEY, command.as_str());
        }
        self.publish(TransportEvent::HostCommand {
            device_id: client,
            command,
        });
    }
}

async fn pump_events(mut events: mpsc::UnboundedReceiver<GattServiceEvent>, context: EventContext) {
    while let Some(event) = events.recv().await {
        context.handle(event);
    }
    trace!("GATT event pump finished");
}

/// A service wired to the event pump
struct ActiveService {
    service: Arc<dyn GattService>,
    handler: HandlerId,
    pump: JoinHandle<()>,
}

// ----------------------------------------------------------------------------
// Transport Service
// ----------------------------------------------------------------------------

/// Lifecycle owner of the HID GATT service
pub struct GattTransportService {
    config: TransportConfig,
    factory: ServiceFactory,
    breaker: Arc<CircuitBreaker>,
    recorder: Arc<dyn OperationRecorder>,
    /// Serialises start and stop
    transition: tokio::sync::Mutex<()>,
    state: watch::Sender<TransportServiceState>,
    active: RwLock<Option<ActiveService>>,
    devices: Arc<ConnectionTable>,
    events: broadcast::Sender<TransportEvent>,
    monitor: Mutex<Option<DiscoveryMonitor>>,
    advertising: RwLock<AdvertisingParameters>,
}

impl GattTransportService {
    pub fn new(
        config: TransportConfig,
        platform: Arc<dyn GattPlatform>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let factory = ServiceFactory::new(platform).with_service_uuid(config.service_uuid);
        let (state, _) = watch::channel(TransportServiceState::Stopped);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let advertising = AdvertisingParameters::from(&config);

        Self {
            config,
            factory,
            breaker,
            recorder: Arc::new(NoopRecorder),
            transition: tokio::sync::Mutex::new(()),
            state,
            active: RwLock::new(None),
            devices: Arc::new(ConnectionTable::new()),
            events,
            monitor: Mutex::new(None),
            advertising: RwLock::new(advertising),
        }
    }

    /// Send operation outcomes to `recorder` (usually the health monitor)
    pub fn with_recorder(mut self, recorder: Arc<dyn OperationRecorder>) -> Self {
        self.factory = self.factory.clone().with_recorder(Arc::clone(&recorder));
        self.recorder = recorder;
        self
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn state(&self) -> TransportServiceState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<TransportServiceState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    pub fn connected_devices(&self) -> Vec<ConnectedDevice> {
        self.devices.list()
    }

    pub fn device(&self, id: &DeviceId) -> Option<ConnectedDevice> {
        self.devices.get(id)
    }

    /// Advertisement status of the current service, if one exists
    pub fn advertisement_status(&self) -> Option<AdvertisementStatus> {
        self.current_service().map(|s| s.advertisement_status())
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn advertising_parameters(&self) -> AdvertisingParameters {
        self.advertising
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Parameters used by the next advertising request
    pub fn set_advertising_parameters(&self, parameters: AdvertisingParameters) {
        *self.advertising.write().unwrap_or_else(PoisonError::into_inner) = parameters;
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Build the service and bring advertising up.
    ///
    /// Calling this while running is a no-op.
    pub async fn start(&self, cancel: &CancellationToken) -> BlehidResult<()> {
        let _transition = self.transition.lock().await;
        if self.state() == TransportServiceState::Running {
            info!("Transport already running");
            return Ok(());
        }

        info!("Starting GATT transport as '{}'", self.advertising_parameters().device_name);
        self.set_state(TransportServiceState::Starting);

        match self.start_advertising_with_retry(cancel).await {
            Ok(()) => {
                self.set_state(TransportServiceState::Running);
                self.spawn_monitor();
                info!("GATT transport running");
                Ok(())
            }
            Err(e) => {
                error!("GATT transport failed to start: {}", e);
                self.teardown_service().await;
                self.set_state(TransportServiceState::Stopped);
                Err(e)
            }
        }
    }

    /// Tear everything down. Calling this while stopped is a no-op.
    pub async fn stop(&self) -> BlehidResult<()> {
        let _transition = self.transition.lock().await;
        if self.state() == TransportServiceState::Stopped {
            info!("Transport already stopped");
            return Ok(());
        }

        info!("Stopping GATT transport");
        self.set_state(TransportServiceState::Stopping);

        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(monitor) = monitor {
            monitor.shutdown(self.config.shutdown_timeout()).await;
        }

        if let Some(service) = self.current_service() {
            self.stop_service_advertising(service.as_ref()).await;
        }

        self.disconnect_all();
        self.teardown_service().await;
        self.set_state(TransportServiceState::Stopped);
        info!("GATT transport stopped");
        Ok(())
    }

    /// Stop advertising while keeping the service and its connections
    pub async fn pause_advertising(&self) -> BlehidResult<()> {
        let _transition = self.transition.lock().await;
        let service = self.running_service()?;
        self.stop_service_advertising(service.as_ref()).await;
        Ok(())
    }

    /// Advertise again on the running service with the current parameters
    pub async fn resume_advertising(&self, cancel: &CancellationToken) -> BlehidResult<()> {
        let _transition = self.transition.lock().await;
        let service = self.running_service()?;
        self.advertise_attempt(service.as_ref(), 1, cancel).await
    }

    fn set_state(&self, to: TransportServiceState) {
        let from = self.state.send_replace(to);
        if from != to {
            debug!("Transport state {} -> {}", from, to);
            let _ = self.events.send(TransportEvent::StateChanged { from, to });
        }
    }

    fn spawn_monitor(&self) {
        let Some(service) = self.current_service() else {
            return;
        };
        let monitor = DiscoveryMonitor::spawn(
            service,
            Arc::clone(&self.devices),
            self.config.discovery_log_interval(),
        );
        let previous = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(monitor);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn disconnect_all(&self) {
        for device in self.devices.drain_all() {
            info!("Disconnecting device {} ({})", device.name, device.id);
            let _ = self.events.send(TransportEvent::ConnectionStateChanged {
                device_id: device.id.clone(),
                state: DeviceConnectionState::Disconnected,
            });
            let _ = self.events.send(TransportEvent::DeviceDisconnected(device));
        }
    }

    // ------------------------------------------------------------------------
    // Service Management
    // ------------------------------------------------------------------------

    fn current_service(&self) -> Option<Arc<dyn GattService>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| Arc::clone(&active.service))
    }

    fn running_service(&self) -> BlehidResult<Arc<dyn GattService>> {
        let state = self.state();
        if state != TransportServiceState::Running {
            return Err(TransportError::NotRunning {
                state: state.to_string(),
            }
            .into());
        }
        self.current_service().ok_or_else(|| {
            TransportError::NotRunning {
                state: state.to_string(),
            }
            .into()
        })
    }

    /// Build a service through the breaker; a factory failure is a breaker failure
    async fn create_service(&self, cancel: &CancellationToken) -> BlehidResult<Arc<dyn GattService>> {
        if cancel.is_cancelled() {
            return Err(BlehidError::Cancelled);
        }

        // Construction is never interrupted: a half-built service would be
        // dropped with no dispose call, leaking its platform registration
        let factory = &self.factory;
        let service = self
            .breaker
            .execute(&CancellationToken::new(), || factory.create_hid_service())
            .await
            .map_err(BlehidError::from)?;

        if cancel.is_cancelled() {
            debug!("Start cancelled during service construction, disposing service");
            self.factory.dispose_service(service).await;
            return Err(BlehidError::Cancelled);
        }
        Ok(service)
    }

    /// Register the event sink and start pumping service events
    fn wire(&self, service: Arc<dyn GattService>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = service.register_event_handler(tx);
        let context = EventContext {
            devices: Arc::clone(&self.devices),
            events: self.events.clone(),
        };
        let pump = tokio::spawn(pump_events(rx, context));

        let previous = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(ActiveService {
                service,
                handler,
                pump,
            });
        if let Some(previous) = previous {
            warn!("Replacing a wired service without teardown");
            unwire(previous);
        }
    }

    /// Unwire and dispose the current service, if any
    async fn teardown_service(&self) {
        let active = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(active) = active {
            let service = unwire(active);
            self.factory.dispose_service(service).await;
        }
    }

    /// Dispose the current service and build a fresh one.
    ///
    /// Runs to completion regardless of the caller's cancellation.
    async fn rebuild_service(&self) -> BlehidResult<()> {
        self.teardown_service().await;
        let service = self.create_service(&CancellationToken::new()).await?;
        self.wire(service);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Advertising
    // ------------------------------------------------------------------------

    async fn start_advertising_with_retry(&self, cancel: &CancellationToken) -> BlehidResult<()> {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(BlehidError::Cancelled);
            }

            let started = Instant::now();
            let outcome = match self.current_service() {
                Some(service) => self.advertise_attempt(service.as_ref(), attempt, cancel).await,
                None => match self.create_service(cancel).await {
                    Ok(service) => {
                        self.wire(Arc::clone(&service));
                        self.advertise_attempt(service.as_ref(), attempt, cancel).await
                    }
                    Err(e) => Err(e),
                },
            };

            let err = match outcome {
                Ok(()) => {
                    self.recorder.record_success("advertise", started.elapsed());
                    info!("Advertising started on attempt {}/{}", attempt, max_attempts);
                    return Ok(());
                }
                Err(BlehidError::Cancelled) => return Err(BlehidError::Cancelled),
                Err(e) => e,
            };

            self.recorder
                .record_failure("advertise", started.elapsed(), &err.to_string());
            warn!(
                "Advertising attempt {}/{} failed: {}",
                attempt, max_attempts, err
            );
            if !err.is_retryable() {
                return Err(err);
            }
            last_error = Some(err);

            if attempt == max_attempts {
                break;
            }

            // A failed start can leave the platform object unusable
            match self.rebuild_service().await {
                Ok(()) => debug!("Rebuilt HID service after attempt {}", attempt),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("Failed to rebuild HID service: {}", e);
                    last_error = Some(e);
                }
            }

            let backoff = retry.backoff_for_attempt(attempt);
            debug!("Retrying advertising in {:?}", backoff);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BlehidError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        Err(TransportError::RetriesExhausted {
            attempts: max_attempts,
            last_error: Box::new(last_error.unwrap_or(TransportError::AdvertisementAborted.into())),
        }
        .into())
    }

    /// One advertising attempt on `service`
    async fn advertise_attempt(
        &self,
        service: &dyn GattService,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> BlehidResult<()> {
        let status = service.advertisement_status();
        if status == AdvertisementStatus::Started {
            return Ok(());
        }
        if !status.is_startable() {
            return Err(TransportError::AdvertisementStart {
                attempt,
                reason: format!("advertisement status {} does not allow starting", status),
            }
            .into());
        }

        let parameters = self.advertising_parameters();
        debug!(
            "Advertising attempt {} as '{}' every {:?}",
            attempt, parameters.device_name, parameters.interval
        );
        service
            .start_advertising(&parameters)
            .await
            .map_err(|e| match e {
                BlehidError::Transport(TransportError::AdvertisementStart { .. }) => e,
                other => TransportError::AdvertisementStart {
                    attempt,
                    reason: other.to_string(),
                }
                .into(),
            })?;

        self.poll_advertisement_status(service, status, cancel).await
    }

    /// Wait for the platform to confirm advertising.
    ///
    /// `Started` succeeds, `Aborted` fails. A transition that settles back on
    /// `Created` or `Stopped` is accepted as well.
    async fn poll_advertisement_status(
        &self,
        service: &dyn GattService,
        initial: AdvertisementStatus,
        cancel: &CancellationToken,
    ) -> BlehidResult<()> {
        let timeout = self.config.retry.status_timeout();
        let interval = self.config.retry.poll_interval();
        let deadline = Instant::now() + timeout;
        let mut last = initial;
        let mut transitioned = false;

        loop {
            let status = service.advertisement_status();
            if status != last {
                debug!("Advertisement status {} -> {}", last, status);
                let _ = self.events.send(TransportEvent::AdvertisementStatusChanged {
                    previous: last,
                    current: status,
                });
                transitioned = true;
                last = status;
            }

            match status {
                AdvertisementStatus::Started => return Ok(()),
                AdvertisementStatus::Aborted => {
                    return Err(TransportError::AdvertisementAborted.into());
                }
                AdvertisementStatus::Created | AdvertisementStatus::Stopped if transitioned => {
                    info!("Advertisement settled on {}, accepting", status);
                    return Ok(());
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(TransportError::AdvertisementTimeout {
                    timeout,
                    last_status: status,
                }
                .into());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BlehidError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn stop_service_advertising(&self, service: &dyn GattService) {
        let previous = service.advertisement_status();
        if !matches!(
            previous,
            AdvertisementStatus::Started | AdvertisementStatus::Starting
        ) {
            return;
        }
        match service.stop_advertising().await {
            Ok(()) => {
                let current = service.advertisement_status();
                if current != previous {
                    let _ = self
                        .events
                        .send(TransportEvent::AdvertisementStatusChanged { previous, current });
                }
            }
            Err(e) => warn!("Failed to stop advertising: {}", e),
        }
    }

    // ------------------------------------------------------------------------
    // Report Delivery
    // ------------------------------------------------------------------------

    /// Deliver `report` to every subscribed device.
    ///
    /// Per-device failures are logged and counted, never returned.
    pub async fn send_report(
        &self,
        report: &HidReport,
        cancel: &CancellationToken,
    ) -> BlehidResult<DeliverySummary> {
        let service = self.running_service()?;

        if let Err(e) = service
            .set_value(REPORT_CHARACTERISTIC_UUID, report.data.clone())
            .await
        {
            warn!("Failed to update Report value: {}", e);
        }

        let targets = self.devices.ids();
        if targets.is_empty() {
            trace!("No subscribed devices for report {}", report.to_hex());
            return Ok(DeliverySummary::default());
        }

        let deliveries = targets
            .iter()
            .map(|id| self.deliver(Arc::clone(&service), id, &report.data, cancel));
        let results = join_all(deliveries).await;

        let mut summary = DeliverySummary::default();
        for result in results {
            match result {
                Ok(()) => summary.delivered += 1,
                Err(BlehidError::CircuitOpen(_)) => summary.rejected += 1,
                Err(_) => summary.failed += 1,
            }
        }
        trace!(
            "Report {} delivered to {}/{} devices",
            report.to_hex(),
            summary.delivered,
            summary.attempted()
        );
        Ok(summary)
    }

    /// Deliver `report` to one subscribed device
    pub async fn send_report_to_device(
        &self,
        device_id: &DeviceId,
        report: &HidReport,
        cancel: &CancellationToken,
    ) -> BlehidResult<()> {
        let service = self.running_service()?;
        if !self.devices.contains(device_id) {
            return Err(TransportError::DeviceNotSubscribed {
                device_id: device_id.clone(),
            }
            .into());
        }
        self.deliver(service, device_id, &report.data, cancel).await
    }

    async fn deliver(
        &self,
        service: Arc<dyn GattService>,
        device_id: &DeviceId,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> BlehidResult<()> {
        let started = Instant::now();
        let result = self
            .breaker
            .execute(cancel, || {
                service.notify(REPORT_CHARACTERISTIC_UUID, device_id, data)
            })
            .await
            .map_err(BlehidError::from);

        match &result {
            Ok(()) => {
                self.devices.record_delivery(device_id);
                self.recorder.record_success("notify", started.elapsed());
            }
            Err(e) => {
                warn!("Report delivery to {} failed: {}", device_id, e);
                self.recorder
                    .record_failure("notify", started.elapsed(), &e.to_string());
            }
        }
        result
    }
}

impl Drop for GattTransportService {
    fn drop(&mut self) {
        let monitor = self
            .monitor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(monitor) = monitor {
            monitor.abort();
        }
        let active = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(active) = active {
            unwire(active);
        }
    }
}

fn unwire(active: ActiveService) -> Arc<dyn GattService> {
    if !active.service.unregister_event_handler(active.handler) {
        debug!("Event {} was already unregistered", active.handler);
    }
    active.pump.abort();
    active.service
}
