//! Transport Lifecycle Tests
//!
//! End-to-end tests of the GATT transport against the simulated platform:
//! start/stop, advertising retries, connection tracking, report delivery and
//! host commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use blehid_ble::gatt::simulated::{AdvertisingOutcome, SimulatedPlatform};
use blehid_ble::{
    ControlPointCommand, GattPlatform, GattTransportService, SubscribedClient, TransportEvent,
};
use blehid_core::{
    AdvertisementStatus, BlehidError, CircuitBreaker, CircuitBreakerConfig, CircuitState, DeviceConnectionState,
    DeviceId, HealthMonitor, HealthMonitorConfig, HidReport, InputSource, OperationRecorder,
    TransportConfig, TransportError, TransportServiceState,
};

// ----------------------------------------------------------------------------
// Test Setup
// ----------------------------------------------------------------------------

const EVENT_TIMEOUT: Duration = Duration::from_secs(1);

fn setup_transport(
    breaker_config: CircuitBreakerConfig,
) -> (Arc<SimulatedPlatform>, GattTransportService) {
    let platform = Arc::new(SimulatedPlatform::new());
    let transport = GattTransportService::new(
        TransportConfig::default(),
        Arc::clone(&platform) as Arc<dyn GattPlatform>,
        Arc::new(CircuitBreaker::new("gatt", breaker_config)),
    );
    (platform, transport)
}

fn keyboard_report() -> HidReport {
    HidReport::input(1, vec![0x02, 0, 0x04, 0, 0, 0, 0, 0], InputSource::Keyboard)
}

/// Next connection-related event, skipping lifecycle noise
async fn next_connection_event(events: &mut broadcast::Receiver<TransportEvent>) -> TransportEvent {
    loop {
        let event = timeout(EVENT_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        match event {
            TransportEvent::StateChanged { .. } | TransportEvent::AdvertisementStatusChanged { .. } => {
                continue
            }
            other => return other,
        }
    }
}

async fn wait_for_devices(transport: &GattTransportService, count: usize) {
    timeout(EVENT_TIMEOUT, async {
        while transport.connected_devices().len() != count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("device table did not settle");
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let (platform, transport) = setup_transport(CircuitBreakerConfig::default());
    let cancel = CancellationToken::new();

    transport.start(&cancel).await.expect("first start");
    transport.start(&cancel).await.expect("second start");
    assert_eq!(transport.state(), TransportServiceState::Running);
    assert_eq!(platform.services_created(), 1);

    transport.stop().await.expect("first stop");
    transport.stop().await.expect("second stop");
    assert_eq!(transport.state(), TransportServiceState::Stopped);
    assert!(platform.current_service().is_none());
}

#[tokio::test]
async fn test_state_transitions_are_published() {
    let (_platform, transport) = setup_transport(CircuitBreakerConfig::default());
    let mut state = transport.state_watch();

    transport.start(&CancellationToken::new()).await.unwrap();
    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), TransportServiceState::Running);

    transport.stop().await.unwrap();
    assert_eq!(*state.borrow_and_update(), TransportServiceState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_rebuilds_each_attempt() {
    let (platform, transport) = setup_transport(CircuitBreakerConfig::default());
    for _ in 0..3 {
        platform.push_advertising_outcome(AdvertisingOutcome::Aborted);
    }

    let err = transport.start(&CancellationToken::new()).await.unwrap_err();
    match err {
        BlehidError::Transport(TransportError::RetriesExhausted { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                *last_error,
                BlehidError::Transport(TransportError::AdvertisementAborted)
            ));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(platform.services_created(), 3);
    assert_eq!(transport.state(), TransportServiceState::Stopped);
    assert!(platform.current_service().is_none());
    assert_eq!(platform.script(|script| script.advertising.len()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_second_attempt_succeeds_on_fresh_service() {
    let (platform, transport) = setup_transport(CircuitBreakerConfig::default());
    platform.push_advertising_outcome(AdvertisingOutcome::Aborted);
    platform.push_advertising_outcome(AdvertisingOutcome::Started);

    transport.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(transport.state(), TransportServiceState::Running);
    assert_eq!(platform.services_created(), 2);
    assert_eq!(platform.current_service().unwrap().advertising_requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_service_creation_failures_are_retried() {
    let (platform, transport) = setup_transport(CircuitBreakerConfig::default());
    platform.script(|script| script.fail_service_creation = 1);

    transport.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(transport.state(), TransportServiceState::Running);
    assert_eq!(platform.services_created(), 1);
    assert_eq!(transport.circuit_breaker().metrics().total_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rebuilt_services_stuck_aborted_are_retried() {
    let (platform, transport) = setup_transport(CircuitBreakerConfig::default());
    platform.push_advertising_outcome(AdvertisingOutcome::Aborted);
    platform.script(|script| {
        script.initial_statuses.push_back(AdvertisementStatus::Created);
        script
            .initial_statuses
            .extend([AdvertisementStatus::Aborted; 8]);
    });

    let err = transport.start(&CancellationToken::new()).await.unwrap_err();
    match err {
        BlehidError::Transport(TransportError::RetriesExhausted { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                *last_error,
                BlehidError::Transport(TransportError::AdvertisementNotStartable {
                    status: AdvertisementStatus::Aborted
                })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }

    // One good build, then a rebuild after each of the first two attempts
    // and a fresh build on each of the last two
    assert_eq!(platform.services_created(), 5);
    assert_eq!(transport.state(), TransportServiceState::Stopped);
    assert!(platform.current_service().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_construction_disposes_service() {
    let (platform, transport) = setup_transport(CircuitBreakerConfig::default());
    let transport = Arc::new(transport);
    platform.script(|script| script.adapter_delay = Some(Duration::from_secs(5)));

    let cancel = CancellationToken::new();
    let start = tokio::spawn({
        let transport = Arc::clone(&transport);
        let cancel = cancel.clone();
        async move { transport.start(&cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(platform.services_created(), 1);
    cancel.cancel();

    let result = start.await.unwrap();
    assert!(matches!(result, Err(BlehidError::Cancelled)));
    assert_eq!(transport.state(), TransportServiceState::Stopped);
    assert_eq!(platform.services_created(), 1);
    assert!(platform.current_service().is_none());
    assert_eq!(transport.circuit_breaker().metrics().total_failures, 0);
}

// ----------------------------------------------------------------------------
// Connection Tracking
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_connection_diff_emits_exact_events() {
    let (platform, transport) = setup_transport(CircuitBreakerConfig::default());
    transport.start(&CancellationToken::new()).await.unwrap();
    let service = platform.current_service().unwrap();
    let mut events = transport.subscribe_events();

    service.connect_client(SubscribedClient::new("A"));
    service.connect_client(SubscribedClient::new("B"));
    service.disconnect_client(&DeviceId::new("A"));

    let expected = [
        ("A", DeviceConnectionState::Connected),
        ("B", DeviceConnectionState::Connected),
        ("A", DeviceConnectionState::Disconnected),
    ];
    for (id, state) in expected {
        match next_connection_event(&mut events).await {
            TransportEvent::ConnectionStateChanged { device_id, state: s } => {
                assert_eq!(device_id.as_str(), id);
                assert_eq!(s, state);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match next_connection_event(&mut events).await {
            TransportEvent::DeviceConnected(device) => {
                assert_eq!(state, DeviceConnectionState::Connected);
                assert_eq!(device.id.as_str(), id);
            }
            TransportEvent::DeviceDisconnected(device) => {
                assert_eq!(state, DeviceConnectionState::Disconnected);
                assert_eq!(device.id.as_str(), id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    let devices = transport.connected_devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id.as_str(), "B");
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_disconnects_all_devices() {
    let (platform, transport) = setup_transport(CircuitBreakerConfig::default());
    transport.start(&CancellationToken::new()).await.unwrap();
    let service = platform.current_service().unwrap();
    service.connect_client(SubscribedClient::new("A"));
    service.connect_client(SubscribedClient::new("B"));
    wait_for_devices(&transport, 2).await;

    let mut events = transport.subscribe_events();
    transport.stop().await.unwrap();

    let mut disconnected = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let TransportEvent::DeviceDisconnected(device) = event {
            disconnected.push(device.id.to_string());
        }
    }
    disconnected.sort();
    assert_eq!(disconnected, vec!["A", "B"]);
    assert!(transport.connected_devices().is_empty());
}

// ----------------------------------------------------------------------------
// Report Delivery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_failing_device_does_not_block_others() {
    let (platform, transport) = setup_transport(CircuitBreakerConfig::default());
    transport.start(&CancellationToken::new()).await.unwrap();
    let service = platform.current_service().unwrap();
    service.connect_client(SubscribedClient::new("X"));
    service.connect_client(SubscribedClient::new("Y"));
    wait_for_devices(&transport, 2).await;
    platform.script(|script| {
        script.notify_failures.insert(DeviceId::new("X"));
    });

    let report = keyboard_report();
    let summary = transport
        .send_report(&report, &CancellationToken::new())
        .await
        .expect("broadcast completes");

    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(service.notifications(), vec![(DeviceId::new("Y"), report.data.clone())]);
    assert_eq!(transport.device(&DeviceId::new("Y")).unwrap().reports_delivered, 1);
}

#[tokio::test]
async fn test_report_value_is_readable() {
    let (platform, transport) = setup_transport(CircuitBreakerConfig::default());
    transport.start(&CancellationToken::new()).await.unwrap();

    let report = keyboard_report();
    let summary = transport
        .send_report(&report, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.attempted(), 0);

    let service = platform.current_service().unwrap();
    assert_eq!(
        service.read(blehid_ble::REPORT_CHARACTERISTIC_UUID, None),
        Some(report.data)
    );
}

#[tokio::test]
async fn test_send_to_unsubscribed_device_fails() {
    let (_platform, transport) = setup_transport(CircuitBreakerConfig::default());
    transport.start(&CancellationToken::new()).await.unwrap();

    let err = transport
        .send_report_to_device(&DeviceId::new("ghost"), &keyboard_report(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BlehidError::Transport(TransportError::DeviceNotSubscribed { .. })
    ));
}

#[tokio::test]
async fn test_repeated_failures_open_the_breaker() {
    let (platform, transport) =
        setup_transport(CircuitBreakerConfig::default().with_failure_threshold(2));
    transport.start(&CancellationToken::new()).await.unwrap();
    let service = platform.current_service().unwrap();
    service.connect_client(SubscribedClient::new("X"));
    wait_for_devices(&transport, 1).await;
    platform.script(|script| {
        script.notify_failures.insert(DeviceId::new("X"));
    });

    let cancel = CancellationToken::new();
    for _ in 0..2 {
        let summary = transport.send_report(&keyboard_report(), &cancel).await.unwrap();
        assert_eq!(summary.failed, 1);
    }
    assert_eq!(transport.circuit_breaker().state(), CircuitState::Open);

    let summary = transport.send_report(&keyboard_report(), &cancel).await.unwrap();
    assert_eq!(summary.rejected, 1);

    let err = transport
        .send_report_to_device(&DeviceId::new("X"), &keyboard_report(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, BlehidError::CircuitOpen(_)));
}

#[tokio::test]
async fn test_deliveries_are_recorded_by_health_monitor() {
    let platform = Arc::new(SimulatedPlatform::new());
    let monitor = Arc::new(HealthMonitor::new(HealthMonitorConfig::default()));
    let transport = GattTransportService::new(
        TransportConfig::default(),
        Arc::clone(&platform) as Arc<dyn GattPlatform>,
        Arc::new(CircuitBreaker::new("gatt", CircuitBreakerConfig::default())),
    )
    .with_recorder(Arc::clone(&monitor) as Arc<dyn OperationRecorder>);

    transport.start(&CancellationToken::new()).await.unwrap();
    let service = platform.current_service().unwrap();
    service.connect_client(SubscribedClient::new("A"));
    wait_for_devices(&transport, 1).await;
    transport
        .send_report(&keyboard_report(), &CancellationToken::new())
        .await
        .unwrap();

    // create_service, advertise, notify
    assert_eq!(monitor.recorded_operations(), 3);
    let report = monitor.run_once().await;
    assert_eq!(report.metrics.operations_by_type.get("notify"), Some(&1));
    assert_eq!(report.metrics.failed_operations, 0);
}

// ----------------------------------------------------------------------------
// Host Commands
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_control_point_writes_become_host_commands() {
    let (platform, transport) = setup_transport(CircuitBreakerConfig::default());
    transport.start(&CancellationToken::new()).await.unwrap();
    let service = platform.current_service().unwrap();
    service.connect_client(SubscribedClient::new("A"));
    wait_for_devices(&transport, 1).await;
    let mut events = transport.subscribe_events();

    service.write(
        blehid_ble::protocol::HID_CONTROL_POINT_CHARACTERISTIC_UUID,
        Some(DeviceId::new("A")),
        vec![0x00],
    );
    // Unknown commands are ignored
    service.write(
        blehid_ble::protocol::HID_CONTROL_POINT_CHARACTERISTIC_UUID,
        Some(DeviceId::new("A")),
        vec![0x7F],
    );
    service.write(
        blehid_ble::protocol::HID_CONTROL_POINT_CHARACTERISTIC_UUID,
        None,
        vec![0x01],
    );

    match next_connection_event(&mut events).await {
        TransportEvent::HostCommand { device_id, command } => {
            assert_eq!(device_id, Some(DeviceId::new("A")));
            assert_eq!(command, ControlPointCommand::Suspend);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match next_connection_event(&mut events).await {
        TransportEvent::HostCommand { device_id, command } => {
            assert_eq!(device_id, None);
            assert_eq!(command, ControlPointCommand::ExitSuspend);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let device = transport.device(&DeviceId::new("A")).unwrap();
    assert_eq!(device.metadata.get("host_command").map(String::as_str), Some("suspend"));
}
