//! Pluggable component health checks

use std::sync::Arc;

use async_trait::async_trait;

use super::status::ComponentHealthResult;
use super::system::ResourceSampler;
use crate::adapter::AdapterProbe;
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::errors::BlehidResult;

/// A component contributing to the overall health status.
///
/// Checks run concurrently on their own tasks. An error, panic or timeout is
/// reported by the monitor as a Critical result for that component only.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> BlehidResult<ComponentHealthResult>;
}

// ----------------------------------------------------------------------------
// Adapter
// ----------------------------------------------------------------------------

/// Adapter presence, LE capability and radio state
pub struct AdapterHealthCheck {
    probe: Arc<dyn AdapterProbe>,
}

impl AdapterHealthCheck {
    pub const NAME: &'static str = "adapter";

    pub fn new(probe: Arc<dyn AdapterProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl HealthCheck for AdapterHealthCheck {
    async fn check(&self) -> BlehidResult<ComponentHealthResult> {
        let status = self.probe.adapter_status().await?;

        let result = if !status.present {
            ComponentHealthResult::offline(Self::NAME, "No Bluetooth adapter found").with_actions([
                "Check that a Bluetooth adapter is attached and recognised by the OS",
                "Make sure the bluetoothd service is running",
            ])
        } else if !status.low_energy_supported {
            ComponentHealthResult::critical(Self::NAME, "Adapter does not support Low Energy")
                .with_action("Use a Bluetooth 4.0+ adapter that supports LE peripheral mode")
        } else if !status.powered {
            ComponentHealthResult::critical(Self::NAME, "Bluetooth radio is off")
                .with_action("Enable the Bluetooth radio")
        } else {
            ComponentHealthResult::healthy(Self::NAME, "Adapter ready")
        };

        let mut result = result.with_diagnostic("summary", status.summary());
        if let Some(name) = status.name {
            result = result.with_diagnostic("name", name);
        }
        if let Some(address) = status.address {
            result = result.with_diagnostic("address", address);
        }
        Ok(result)
    }
}

// ----------------------------------------------------------------------------
// Circuit Breaker
// ----------------------------------------------------------------------------

/// Breaker state and failure rate
pub struct CircuitBreakerHealthCheck {
    breaker: Arc<CircuitBreaker>,
    failure_rate_warning_percent: f64,
}

impl CircuitBreakerHealthCheck {
    pub const NAME: &'static str = "circuit_breaker";

    pub fn new(breaker: Arc<CircuitBreaker>, failure_rate_warning_percent: f64) -> Self {
        Self {
            breaker,
            failure_rate_warning_percent,
        }
    }
}

#[async_trait]
impl HealthCheck for CircuitBreakerHealthCheck {
    async fn check(&self) -> BlehidResult<ComponentHealthResult> {
        let metrics = self.breaker.metrics();

        let result = match metrics.state {
            CircuitState::Open => ComponentHealthResult::critical(
                Self::NAME,
                format!("Circuit {} is open", metrics.name),
            )
            .with_action("Wait for the recovery timeout and check the adapter"),
            CircuitState::HalfOpen => ComponentHealthResult::degraded(
                Self::NAME,
                format!("Circuit {} is probing recovery", metrics.name),
            ),
            CircuitState::Closed if metrics.failure_rate > self.failure_rate_warning_percent => {
                ComponentHealthResult::degraded(
                    Self::NAME,
                    format!("High failure rate: {:.1}%", metrics.failure_rate),
                )
            }
            CircuitState::Closed => ComponentHealthResult::healthy(Self::NAME, "Circuit closed"),
        };

        Ok(result
            .with_diagnostic("state", metrics.state)
            .with_diagnostic("consecutive_failures", metrics.consecutive_failures)
            .with_diagnostic("failure_rate", format!("{:.1}", metrics.failure_rate))
            .with_diagnostic("rejections", metrics.total_rejections))
    }
}

// ----------------------------------------------------------------------------
// Memory
// ----------------------------------------------------------------------------

/// Resident memory against warning and critical thresholds
pub struct MemoryHealthCheck {
    sampler: Arc<dyn ResourceSampler>,
    warning_bytes: u64,
    critical_bytes: u64,
}

impl MemoryHealthCheck {
    pub const NAME: &'static str = "memory";

    pub fn new(sampler: Arc<dyn ResourceSampler>, warning_bytes: u64, critical_bytes: u64) -> Self {
        Self {
            sampler,
            warning_bytes,
            critical_bytes,
        }
    }
}

#[async_trait]
impl HealthCheck for MemoryHealthCheck {
    async fn check(&self) -> BlehidResult<ComponentHealthResult> {
        let Some(rss) = self.sampler.sample().memory_bytes else {
            return Ok(ComponentHealthResult::healthy(
                Self::NAME,
                "Memory usage not available on this platform",
            ));
        };

        let mib = rss / (1024 * 1024);
        let result = if rss >= self.critical_bytes {
            ComponentHealthResult::critical(Self::NAME, format!("Resident memory at {} MiB", mib))
                .with_action("Restart the bridge and report a possible leak")
        } else if rss >= self.warning_bytes {
            ComponentHealthResult::degraded(Self::NAME, format!("Resident memory at {} MiB", mib))
        } else {
            ComponentHealthResult::healthy(Self::NAME, format!("Resident memory at {} MiB", mib))
        };
        Ok(result.with_diagnostic("rss_bytes", rss))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StaticAdapterProbe;
    use crate::config::CircuitBreakerConfig;
    use crate::health::status::HealthStatus;
    use crate::health::system::StaticResourceSampler;
    use crate::types::AdapterStatus;

    #[tokio::test]
    async fn test_adapter_check_statuses() {
        let missing = AdapterHealthCheck::new(Arc::new(StaticAdapterProbe::new(AdapterStatus::missing())));
        assert_eq!(missing.check().await.unwrap().status, HealthStatus::Offline);

        let mut off = AdapterStatus {
            present: true,
            low_energy_supported: true,
            powered: false,
            name: None,
            address: None,
        };
        let radio_off = AdapterHealthCheck::new(Arc::new(StaticAdapterProbe::new(off.clone())));
        assert_eq!(radio_off.check().await.unwrap().status, HealthStatus::Critical);

        off.powered = true;
        off.low_energy_supported = false;
        let no_le = AdapterHealthCheck::new(Arc::new(StaticAdapterProbe::new(off)));
        assert_eq!(no_le.check().await.unwrap().status, HealthStatus::Critical);

        let ready = AdapterHealthCheck::new(Arc::new(StaticAdapterProbe::ready()));
        let result = ready.check().await.unwrap();
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.diagnostics.get("name").map(String::as_str), Some("hci0"));
    }

    #[tokio::test]
    async fn test_breaker_check_follows_state() {
        let breaker = Arc::new(CircuitBreaker::new("gatt", CircuitBreakerConfig::default()));
        let check = CircuitBreakerHealthCheck::new(breaker.clone(), 50.0);
        assert_eq!(check.check().await.unwrap().status, HealthStatus::Healthy);

        breaker.open();
        assert_eq!(check.check().await.unwrap().status, HealthStatus::Critical);

        breaker.half_open();
        assert_eq!(check.check().await.unwrap().status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_memory_thresholds() {
        let check = |rss| {
            MemoryHealthCheck::new(Arc::new(StaticResourceSampler::new(rss, None)), 100, 200)
        };
        assert_eq!(check(Some(50)).check().await.unwrap().status, HealthStatus::Healthy);
        assert_eq!(check(Some(150)).check().await.unwrap().status, HealthStatus::Degraded);
        assert_eq!(check(Some(250)).check().await.unwrap().status, HealthStatus::Critical);
        assert_eq!(check(None).check().await.unwrap().status, HealthStatus::Healthy);
    }
}
