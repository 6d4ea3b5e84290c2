//! Adapter presence probe using btleplug
//!
//! btleplug only exposes the central role, so it cannot report LE peripheral
//! support or radio power. A listed adapter is assumed to be LE-capable and
//! powered; BlueZ hosts get the precise answer from the `bluer` backend.

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _};
use btleplug::platform::Manager;
use tracing::debug;

use blehid_core::{AdapterProbe, AdapterStatus, BlehidResult, TransportError};

/// [`AdapterProbe`] backed by the btleplug adapter list
#[derive(Debug, Default)]
pub struct BtleplugProbe;

impl BtleplugProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AdapterProbe for BtleplugProbe {
    async fn adapter_status(&self) -> BlehidResult<AdapterStatus> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::AdapterUnavailable {
                reason: format!("Failed to create BLE manager: {}", e),
            })?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| TransportError::AdapterUnavailable {
                reason: format!("Failed to get BLE adapters: {}", e),
            })?;

        let Some(adapter) = adapters.into_iter().next() else {
            debug!("No BLE adapters reported by btleplug");
            return Ok(AdapterStatus::missing());
        };

        let name = adapter.adapter_info().await.ok();
        debug!("btleplug adapter: {:?}", name);

        Ok(AdapterStatus {
            present: true,
            low_energy_supported: true,
            powered: true,
            name,
            address: None,
        })
    }
}
