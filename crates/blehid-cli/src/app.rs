//! Application wiring: platform selection, transport, health and input

use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blehid_ble::{GattPlatform, GattTransportService, ServiceFactory, SimulatedPlatform, TransportEvent};
use blehid_core::advertisement::{strategy_by_name, AdvertisementConfig, StaticEnvironment};
use blehid_core::input::text_to_key_events;
use blehid_core::{
    AdapterProbe, AdvertisementBackend, AdvertisementManager, CircuitBreaker, HealthMonitor,
    InputEvent, InputPipeline, ReportSink,
};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Lines buffered between the stdin reader thread and the pipeline
const STDIN_CHANNEL_CAPACITY: usize = 64;

// ----------------------------------------------------------------------------
// Platform Selection
// ----------------------------------------------------------------------------

/// The GATT platform together with its adapter probe view
#[derive(Clone)]
pub struct Platform {
    pub gatt: Arc<dyn GattPlatform>,
    pub probe: Arc<dyn AdapterProbe>,
}

impl Platform {
    fn from_arc<P: GattPlatform + 'static>(platform: Arc<P>) -> Self {
        Self {
            gatt: platform.clone(),
            probe: platform,
        }
    }

    /// In-process simulated provider
    pub fn simulated() -> Self {
        Self::from_arc(Arc::new(SimulatedPlatform::new()))
    }

    /// Platform GATT server for `adapter`, or the default adapter
    pub async fn open(adapter: Option<&str>) -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let platform = blehid_ble::BluezPlatform::new(adapter).await?;
            Ok(Self::from_arc(Arc::new(platform)))
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = adapter;
            Err(CliError::FeatureNotAvailable(
                "hosting a GATT server requires BlueZ on Linux".to_string(),
            ))
        }
    }

    pub fn name(&self) -> &str {
        self.gatt.name()
    }
}

// ----------------------------------------------------------------------------
// Application
// ----------------------------------------------------------------------------

/// Fully wired bridge
pub struct BridgeApp {
    config: AppConfig,
    platform: Platform,
    health: Arc<HealthMonitor>,
    transport: Arc<GattTransportService>,
    advertising: AdvertisementManager,
}

impl BridgeApp {
    pub fn new(config: AppConfig, platform: Platform) -> Result<Self> {
        let breaker = Arc::new(CircuitBreaker::new(
            "gatt-transport",
            config.circuit_breaker.clone(),
        ));
        let health = Arc::new(
            HealthMonitor::new(config.health.clone())
                .with_circuit_breaker(Arc::clone(&breaker))
                .with_adapter_probe(Arc::clone(&platform.probe)),
        );
        let transport = Arc::new(
            GattTransportService::new(
                config.transport.clone(),
                Arc::clone(&platform.gatt),
                breaker,
            )
            .with_recorder(health.clone()),
        );

        let advertising = AdvertisementManager::new(
            Arc::clone(&transport) as Arc<dyn AdvertisementBackend>,
            Arc::new(StaticEnvironment::default()),
            AdvertisementConfig::from(&config.transport),
        );

        Ok(Self {
            config,
            platform,
            health,
            transport,
            advertising,
        })
    }

    pub fn transport(&self) -> &Arc<GattTransportService> {
        &self.transport
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Advertise, type stdin lines on every connected host, stop on cancel
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let strategy = strategy_by_name(&self.config.bridge.strategy).ok_or_else(|| {
            CliError::Other(format!(
                "unknown advertisement strategy {}",
                self.config.bridge.strategy
            ))
        })?;
        self.advertising.set_strategy(Arc::from(strategy)).await;

        self.health.start();
        let event_log = spawn_event_logger(self.transport.subscribe_events(), cancel.clone());

        info!(
            "Starting HID bridge on {} as {:?}",
            self.platform.name(),
            self.config.transport.device_name
        );
        if let Err(e) = self.transport.start(&cancel).await {
            self.health.stop().await;
            event_log.abort();
            return Err(e.into());
        }
        // The transport is already advertising; this hands control to the manager
        if let Err(e) = self.advertising.start().await {
            warn!("Advertisement manager failed to take over: {}", e);
        }

        info!("Type a line and press Enter to send it as keystrokes; Ctrl-C stops");
        let sink = Arc::clone(&self.transport) as Arc<dyn ReportSink>;
        let mut pipeline = InputPipeline::new(sink);
        let stats = pipeline.run(stdin_events(), &cancel).await;
        info!(
            "Input finished: {} events, {} reports sent, {} failed",
            stats.events, stats.reports_sent, stats.failures
        );

        if !cancel.is_cancelled() {
            info!("Standard input closed; still advertising until Ctrl-C");
            cancel.cancelled().await;
        }

        self.shutdown().await;
        event_log.abort();
        Ok(())
    }

    /// Stop advertising and the transport, then the health loop
    pub async fn shutdown(&self) {
        info!("Shutting down HID bridge");
        if let Err(e) = self.advertising.stop().await {
            warn!("Advertisement manager stop failed: {}", e);
        }
        if let Err(e) = self.transport.stop().await {
            warn!("Transport stop failed: {}", e);
        }
        self.health.stop().await;
    }

    /// Probe the adapter, build the HID service once and print a health report
    pub async fn status(&self) -> Result<()> {
        let adapter = self.platform.probe.adapter_status().await?;
        println!(
            "Adapter:  {} ({})",
            adapter.name.as_deref().unwrap_or("unknown"),
            adapter.summary()
        );
        if let Some(address) = &adapter.address {
            println!("Address:  {}", address);
        }

        let factory = ServiceFactory::new(Arc::clone(&self.platform.gatt))
            .with_service_uuid(self.config.transport.service_uuid)
            .with_recorder(self.health.clone());
        match factory.create_hid_service().await {
            Ok(service) => {
                match factory.perform_health_check(service.as_ref()).await {
                    Ok(report) => println!(
                        "Service:  {} with {} characteristics, advertisement {} (checked in {:?})",
                        report.service_uuid,
                        report.characteristic_count,
                        report.advertisement_status,
                        report.duration
                    ),
                    Err(e) => print_failure("Service", &CliError::from(e)),
                }
                factory.dispose_service(service).await;
            }
            Err(e) => print_failure("Service", &CliError::from(e)),
        }

        let report = self.health.run_once().await;
        println!("Health:   {}", report.overall);
        for component in &report.components {
            println!(
                "  {:<16} {:<10} {}",
                component.component, component.status, component.description
            );
            for action in &component.recommended_actions {
                println!("  {:<16} -> {}", "", action);
            }
        }
        Ok(())
    }
}

/// Print an error with its remediation steps
pub fn print_failure(label: &str, error: &CliError) {
    println!("{}: failed: {}", label, error);
    for step in error.remediation() {
        println!("  - {}", step);
    }
}

// ----------------------------------------------------------------------------
// Background Tasks
// ----------------------------------------------------------------------------

fn spawn_event_logger(
    mut events: broadcast::Receiver<TransportEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => log_transport_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Transport event log lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Transport event logger stopped");
    })
}

fn log_transport_event(event: &TransportEvent) {
    match event {
        TransportEvent::DeviceConnected(device) => {
            info!("Host connected: {} ({})", device.name, device.id);
        }
        TransportEvent::DeviceDisconnected(device) => {
            info!("Host disconnected: {} ({})", device.name, device.id);
        }
        TransportEvent::ConnectionStateChanged { device_id, state } => {
            debug!("Connection {} -> {}", device_id, state);
        }
        TransportEvent::AdvertisementStatusChanged { previous, current } => {
            info!("Advertisement {} -> {}", previous, current);
        }
        TransportEvent::HostCommand { device_id, command } => match device_id {
            Some(id) => info!("Host {} requested {}", id, command.as_str()),
            None => info!("Host requested {}", command.as_str()),
        },
        TransportEvent::StateChanged { from, to } => {
            info!("Transport {} -> {}", from, to);
        }
    }
}

/// Keyboard events typed from stdin, one line at a time.
///
/// Stdin is read on a detached thread so a pending read never blocks exit.
fn stdin_events() -> impl Stream<Item = InputEvent> + Send {
    let (tx, rx) = mpsc::channel::<String>(STDIN_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|line| (line, rx)) })
        .flat_map(|line| {
            let events = text_to_key_events(&format!("{}\n", line));
            stream::iter(events.into_iter().map(InputEvent::from))
        })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use blehid_core::TransportServiceState;

    use super::*;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.transport.device_name = "Test Keyboard".to_string();
        config.health.interval_secs = 60;
        config
    }

    #[tokio::test]
    async fn test_simulated_app_starts_and_shuts_down() {
        let app = BridgeApp::new(test_config(), Platform::simulated()).unwrap();

        app.transport()
            .start(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(app.transport().state(), TransportServiceState::Running);

        app.shutdown().await;
        assert_eq!(app.transport().state(), TransportServiceState::Stopped);
        assert!(!app.health().is_running());
    }

    #[tokio::test]
    async fn test_operations_reach_health_monitor() {
        let app = BridgeApp::new(test_config(), Platform::simulated()).unwrap();
        app.transport()
            .start(&CancellationToken::new())
            .await
            .unwrap();

        // create_service and advertise
        assert!(app.health().recorded_operations() >= 2);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_reports_simulated_adapter() {
        let app = BridgeApp::new(test_config(), Platform::simulated()).unwrap();
        tokio::time::timeout(Duration::from_secs(30), app.status())
            .await
            .unwrap()
            .unwrap();
        assert!(app.health().recorded_operations() >= 1);
    }
}
