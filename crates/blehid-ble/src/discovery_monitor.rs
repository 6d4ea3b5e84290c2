//! Periodic advertisement and connection logging
//!
//! Purely observational: the monitor never changes transport state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::devices::ConnectionTable;
use crate::gatt::GattService;

/// Background task logging advertisement status and connection count
pub struct DiscoveryMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl DiscoveryMonitor {
    pub fn spawn(
        service: Arc<dyn GattService>,
        devices: Arc<ConnectionTable>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        info!(
                            "Discovery status: advertisement {}, {} connected device(s)",
                            service.advertisement_status(),
                            devices.len()
                        );
                    }
                }
            }
            debug!("Discovery monitor stopped");
        });

        Self { cancel, handle }
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop without waiting
    pub fn abort(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }

    /// Cancel the loop and wait up to `timeout` for it to finish
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();
        let mut handle = self.handle;
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            warn!("Discovery monitor did not stop within {:?}, aborting", timeout);
            handle.abort();
        }
    }
}
