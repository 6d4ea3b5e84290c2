//! Bluetooth adapter probing

use async_trait::async_trait;

use crate::errors::BlehidResult;
use crate::types::AdapterStatus;

/// Queries the live state of the local Bluetooth adapter
#[async_trait]
pub trait AdapterProbe: Send + Sync {
    /// Current presence, LE capability and radio state of the adapter
    async fn adapter_status(&self) -> BlehidResult<AdapterStatus>;
}

/// Probe returning a fixed status
#[derive(Debug, Clone)]
pub struct StaticAdapterProbe {
    status: AdapterStatus,
}

impl StaticAdapterProbe {
    pub fn new(status: AdapterStatus) -> Self {
        Self { status }
    }

    /// A present, LE-capable, powered adapter
    pub fn ready() -> Self {
        Self::new(AdapterStatus {
            present: true,
            low_energy_supported: true,
            powered: true,
            name: Some("hci0".to_string()),
            address: None,
        })
    }
}

#[async_trait]
impl AdapterProbe for StaticAdapterProbe {
    async fn adapter_status(&self) -> BlehidResult<AdapterStatus> {
        Ok(self.status.clone())
    }
}
