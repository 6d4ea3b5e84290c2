//! HID service construction and disposal
//!
//! [`ServiceFactory`] builds the HID-over-GATT service in a fixed order:
//! base service, the four HID characteristics, structural validation and a
//! live adapter health check. Any failure disposes the partially built
//! service before the error is returned.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blehid_core::hid::combined_report_map;
use blehid_core::{
    AdapterStatus, AdvertisementStatus, BlehidError, BlehidResult, NoopRecorder,
    OperationRecorder, TransportError,
};

use crate::gatt::{CharacteristicParameters, GattPlatform, GattService};
use crate::protocol::{
    characteristic_name, HID_CHARACTERISTICS, HID_CONTROL_POINT_CHARACTERISTIC_UUID,
    HID_INFORMATION, HID_INFORMATION_CHARACTERISTIC_UUID, HID_SERVICE_UUID,
    REPORT_CHARACTERISTIC_UUID, REPORT_MAP_CHARACTERISTIC_UUID,
};

// ----------------------------------------------------------------------------
// Health Report
// ----------------------------------------------------------------------------

/// Result of [`ServiceFactory::perform_health_check`]
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceHealthReport {
    pub adapter: AdapterStatus,
    pub characteristic_count: usize,
    pub service_uuid: Uuid,
    pub advertisement_status: AdvertisementStatus,
    pub issues: Vec<String>,
    pub duration: Duration,
}

impl ServiceHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Service Factory
// ----------------------------------------------------------------------------

/// The four characteristics of the HID service
pub fn hid_characteristics() -> Vec<CharacteristicParameters> {
    vec![
        CharacteristicParameters::new(REPORT_CHARACTERISTIC_UUID, "Report")
            .readable()
            .notifying(),
        CharacteristicParameters::new(REPORT_MAP_CHARACTERISTIC_UUID, "Report Map")
            .readable()
            .with_value(combined_report_map()),
        CharacteristicParameters::new(HID_INFORMATION_CHARACTERISTIC_UUID, "HID Information")
            .readable()
            .with_value(HID_INFORMATION.to_vec()),
        CharacteristicParameters::new(HID_CONTROL_POINT_CHARACTERISTIC_UUID, "HID Control Point")
            .writable_without_response(),
    ]
}

/// Builds, validates and disposes HID GATT services
#[derive(Clone)]
pub struct ServiceFactory {
    platform: Arc<dyn GattPlatform>,
    service_uuid: Uuid,
    recorder: Arc<dyn OperationRecorder>,
}

impl ServiceFactory {
    pub fn new(platform: Arc<dyn GattPlatform>) -> Self {
        Self {
            platform,
            service_uuid: HID_SERVICE_UUID,
            recorder: Arc::new(NoopRecorder),
        }
    }

    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = uuid;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn OperationRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    /// Build a fully configured, validated and health-checked HID service
    pub async fn create_hid_service(&self) -> BlehidResult<Arc<dyn GattService>> {
        let started = Instant::now();
        let result = self.build().await;
        match &result {
            Ok(_) => self.recorder.record_success("create_service", started.elapsed()),
            Err(e) => self
                .recorder
                .record_failure("create_service", started.elapsed(), &e.to_string()),
        }
        result
    }

    async fn build(&self) -> BlehidResult<Arc<dyn GattService>> {
        debug!("Creating HID service {} on {}", self.service_uuid, self.platform.name());
        let service = self.platform.create_service(self.service_uuid).await?;

        if let Err(e) = self.configure(service.as_ref()).await {
            self.dispose_service(service).await;
            return Err(e);
        }

        if let Err(e) = self.validate_service(service.as_ref()) {
            self.dispose_service(service).await;
            return Err(e);
        }

        if let Err(e) = self.perform_health_check(service.as_ref()).await {
            self.dispose_service(service).await;
            return Err(e);
        }

        info!("HID service {} ready", self.service_uuid);
        Ok(service)
    }

    async fn configure(&self, service: &dyn GattService) -> BlehidResult<()> {
        for parameters in hid_characteristics() {
            let uuid = parameters.uuid;
            service
                .create_characteristic(parameters)
                .await
                .map_err(|e| match e {
                    BlehidError::Transport(TransportError::CharacteristicCreation { .. }) => e,
                    other => TransportError::CharacteristicCreation {
                        characteristic: characteristic_name(&uuid).to_string(),
                        reason: other.to_string(),
                    }
                    .into(),
                })?;
            debug!("Created {} characteristic", characteristic_name(&uuid));
        }
        Ok(())
    }

    /// Structural checks on a built service; no I/O
    pub fn validate_service(&self, service: &dyn GattService) -> BlehidResult<()> {
        let status = service.advertisement_status();
        if !status.is_startable() {
            return Err(TransportError::AdvertisementNotStartable { status }.into());
        }

        if service.uuid() != self.service_uuid {
            return Err(validation(format!(
                "service UUID {} does not match {}",
                service.uuid(),
                self.service_uuid
            )));
        }

        let present: HashSet<Uuid> = service.characteristics().iter().map(|c| c.uuid).collect();
        if present.is_empty() {
            return Err(validation("service has no characteristics".to_string()));
        }

        let missing: Vec<&str> = HID_CHARACTERISTICS
            .iter()
            .filter(|uuid| !present.contains(*uuid))
            .map(characteristic_name)
            .collect();
        if !missing.is_empty() {
            return Err(validation(format!(
                "missing characteristics: {}",
                missing.join(", ")
            )));
        }

        Ok(())
    }

    /// Check the live adapter and the service shape
    pub async fn perform_health_check(
        &self,
        service: &dyn GattService,
    ) -> BlehidResult<ServiceHealthReport> {
        let started = Instant::now();
        let adapter = self.platform.adapter_status().await?;

        if !adapter.present {
            return Err(TransportError::AdapterUnavailable {
                reason: "no Bluetooth adapter found".to_string(),
            }
            .into());
        }
        if !adapter.low_energy_supported {
            return Err(TransportError::LowEnergyUnsupported.into());
        }
        if !adapter.powered {
            return Err(TransportError::RadioOff.into());
        }

        let characteristic_count = service.characteristics().len();
        let mut issues = Vec::new();
        if characteristic_count != HID_CHARACTERISTICS.len() {
            issues.push(format!(
                "expected {} characteristics, found {}",
                HID_CHARACTERISTICS.len(),
                characteristic_count
            ));
        }
        if service.uuid() != self.service_uuid {
            issues.push(format!("service UUID mismatch: {}", service.uuid()));
        }

        let report = ServiceHealthReport {
            adapter,
            characteristic_count,
            service_uuid: service.uuid(),
            advertisement_status: service.advertisement_status(),
            issues,
            duration: started.elapsed(),
        };

        if !report.is_healthy() {
            return Err(TransportError::HealthCheck {
                reason: report.issues.join("; "),
            }
            .into());
        }

        debug!(
            "Service health check passed in {:?} (adapter {})",
            report.duration,
            report.adapter.summary()
        );
        Ok(report)
    }

    /// Release a service: stop advertising, drop handlers, close the platform
    /// object. Failures are logged, never returned.
    pub async fn dispose_service(&self, service: Arc<dyn GattService>) {
        let uuid = service.uuid();
        if matches!(
            service.advertisement_status(),
            AdvertisementStatus::Started | AdvertisementStatus::Starting
        ) {
            if let Err(e) = service.stop_advertising().await {
                warn!("Failed to stop advertising on {} during disposal: {}", uuid, e);
            }
        }

        let handlers = service.handler_count();
        if handlers > 0 {
            debug!("Dropping {} event handlers of {}", handlers, uuid);
        }

        if let Err(e) = service.close().await {
            warn!("Failed to close service {}: {}", uuid, e);
        }
        debug!("Disposed service {}", uuid);
    }
}

fn validation(reason: String) -> BlehidError {
    TransportError::Validation { reason }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::simulated::SimulatedPlatform;

    fn factory(platform: &Arc<SimulatedPlatform>) -> ServiceFactory {
        ServiceFactory::new(Arc::clone(platform) as Arc<dyn GattPlatform>)
    }

    async fn build_error(factory: &ServiceFactory) -> BlehidError {
        match factory.create_hid_service().await {
            Ok(service) => panic!("service {} built unexpectedly", service.uuid()),
            Err(err) => err,
        }
    }

    #[tokio::test]
    async fn test_builds_four_characteristics() {
        let platform = Arc::new(SimulatedPlatform::new());
        let service = factory(&platform).create_hid_service().await.unwrap();

        let characteristics = service.characteristics();
        assert_eq!(characteristics.len(), 4);
        let uuids: Vec<Uuid> = characteristics.iter().map(|c| c.uuid).collect();
        assert_eq!(uuids, HID_CHARACTERISTICS.to_vec());

        let sim = platform.current_service().unwrap();
        assert_eq!(sim.value(HID_INFORMATION_CHARACTERISTIC_UUID), Some(vec![0x11, 0x01, 0x00, 0x03]));
        assert_eq!(sim.value(REPORT_MAP_CHARACTERISTIC_UUID), Some(combined_report_map()));
    }

    #[tokio::test]
    async fn test_characteristic_failure_disposes_service() {
        let platform = Arc::new(SimulatedPlatform::new());
        platform.script(|script| script.fail_characteristic = Some(HID_INFORMATION_CHARACTERISTIC_UUID));

        let err = build_error(&factory(&platform)).await;
        assert!(matches!(
            err,
            BlehidError::Transport(TransportError::CharacteristicCreation { .. })
        ));
        assert_eq!(platform.services_created(), 1);
        assert!(platform.current_service().is_none());
    }

    #[tokio::test]
    async fn test_adapter_problems_map_to_errors() {
        let platform = Arc::new(SimulatedPlatform::new());

        platform.set_adapter_status(AdapterStatus::missing());
        let err = build_error(&factory(&platform)).await;
        assert!(matches!(err, BlehidError::Transport(TransportError::AdapterUnavailable { .. })));

        let mut off = AdapterStatus::missing();
        off.present = true;
        off.low_energy_supported = true;
        platform.set_adapter_status(off);
        let err = build_error(&factory(&platform)).await;
        assert!(matches!(err, BlehidError::Transport(TransportError::RadioOff)));
        assert!(!err.is_retryable());
        assert!(platform.current_service().is_none());
    }

    #[tokio::test]
    async fn test_validation_rejects_started_service() {
        let platform = Arc::new(SimulatedPlatform::new());
        let factory = factory(&platform);
        let service = factory.create_hid_service().await.unwrap();
        platform
            .current_service()
            .unwrap()
            .set_advertisement_status(AdvertisementStatus::Started);

        let err = factory.validate_service(service.as_ref()).unwrap_err();
        assert!(matches!(
            err,
            BlehidError::Transport(TransportError::AdvertisementNotStartable {
                status: AdvertisementStatus::Started
            })
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_validation_reports_missing_characteristics() {
        let platform = Arc::new(SimulatedPlatform::new());
        let factory = factory(&platform);
        let service = platform.create_service(HID_SERVICE_UUID).await.unwrap();
        service
            .create_characteristic(hid_characteristics().remove(0))
            .await
            .unwrap();

        let err = factory.validate_service(service.as_ref()).unwrap_err();
        assert!(err.to_string().contains("Report Map"));
    }

    #[tokio::test]
    async fn test_dispose_stops_advertising_and_closes() {
        let platform = Arc::new(SimulatedPlatform::new());
        let factory = factory(&platform);
        let service = factory.create_hid_service().await.unwrap();
        service
            .start_advertising(&crate::gatt::AdvertisingParameters::from(
                &blehid_core::TransportConfig::default(),
            ))
            .await
            .unwrap();
        let sim = platform.current_service().unwrap();

        factory.dispose_service(service).await;
        assert!(sim.is_closed());
        assert_eq!(sim.advertisement_status(), AdvertisementStatus::Stopped);
    }
}
