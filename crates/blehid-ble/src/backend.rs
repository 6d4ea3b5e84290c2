//! Core trait implementations for the GATT transport
//!
//! Lets the input pipeline deliver reports through the transport and the
//! advertisement manager drive the transport's advertising.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use blehid_core::advertisement::AdvertisementConfig;
use blehid_core::{
    AdvertisementBackend, AdvertisementStatus, BlehidResult, HidReport, ReportSink, TransportError,
    TransportServiceState,
};

use crate::gatt::AdvertisingParameters;
use crate::transport::GattTransportService;

#[async_trait]
impl ReportSink for GattTransportService {
    async fn send_report(&self, report: HidReport) -> BlehidResult<()> {
        let summary =
            GattTransportService::send_report(self, &report, &CancellationToken::new()).await?;
        if summary.delivered == 0 && summary.attempted() > 0 {
            return Err(TransportError::Platform(format!(
                "report reached no device ({} failed, {} rejected)",
                summary.failed, summary.rejected
            ))
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl AdvertisementBackend for GattTransportService {
    async fn start_advertising(&self, config: &AdvertisementConfig) -> BlehidResult<()> {
        self.set_advertising_parameters(AdvertisingParameters::from(config));
        let cancel = CancellationToken::new();
        if self.state() == TransportServiceState::Running {
            self.resume_advertising(&cancel).await
        } else {
            self.start(&cancel).await
        }
    }

    async fn stop_advertising(&self) -> BlehidResult<()> {
        if self.state() != TransportServiceState::Running {
            debug!("Transport not running, nothing to stop");
            return Ok(());
        }
        self.pause_advertising().await
    }

    async fn apply_configuration(&self, config: &AdvertisementConfig) -> BlehidResult<()> {
        self.set_advertising_parameters(AdvertisingParameters::from(config));
        if self.advertisement_status() != Some(AdvertisementStatus::Started) {
            return Ok(());
        }
        // Parameters only take effect when advertising restarts
        self.pause_advertising().await?;
        self.resume_advertising(&CancellationToken::new()).await
    }
}
