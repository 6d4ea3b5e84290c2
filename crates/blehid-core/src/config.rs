//! Centralized Configuration Management
//!
//! Configuration structures bound at construction time by the transport,
//! circuit breaker and health monitor. Durations are stored as integer
//! seconds/milliseconds so they round-trip cleanly through TOML and
//! environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{BlehidError, BlehidResult};

/// Bluetooth SIG HID service UUID (0x1812)
pub const HID_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1812_0000_1000_8000_0080_5f9b_34fb);

// ----------------------------------------------------------------------------
// Circuit Breaker Configuration
// ----------------------------------------------------------------------------

/// Configuration for the transport circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before a trial call is admitted
    pub recovery_timeout_secs: u64,
    /// Maximum calls admitted while half-open
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            half_open_max_attempts: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_half_open_max_attempts(mut self, attempts: u32) -> Self {
        self.half_open_max_attempts = attempts;
        self
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn validate(&self) -> BlehidResult<()> {
        if self.failure_threshold == 0 {
            return Err(BlehidError::configuration(
                "circuit breaker failure threshold must be greater than 0",
            ));
        }
        if self.half_open_max_attempts == 0 {
            return Err(BlehidError::configuration(
                "circuit breaker half-open attempts must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Advertisement Retry Configuration
// ----------------------------------------------------------------------------

/// Retry, polling and backoff settings for advertisement start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisingRetryConfig {
    /// Maximum advertisement start attempts per `start` call
    pub max_attempts: u32,
    /// How long to poll for the advertisement status to settle
    pub status_timeout_ms: u64,
    /// Interval between status polls
    pub poll_interval_ms: u64,
    /// Backoff after the first failed attempt; doubles per attempt
    pub initial_backoff_ms: u64,
    /// Upper bound for the backoff
    pub max_backoff_ms: u64,
}

impl Default for AdvertisingRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            status_timeout_ms: 10_000,
            poll_interval_ms: 200,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl AdvertisingRetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff_ms = initial.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Backoff to wait after the given (1-based) failed attempt
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

// ----------------------------------------------------------------------------
// Transport Configuration
// ----------------------------------------------------------------------------

/// Configuration for the GATT transport service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Local name included in advertisements
    pub device_name: String,
    /// Primary service advertised and hosted
    pub service_uuid: Uuid,
    /// Advertising interval in milliseconds
    pub advertising_interval_ms: u64,
    /// Advertising transmit power in dBm
    pub tx_power_dbm: i16,
    /// GAP appearance advertised (0x03C0 = generic HID)
    pub appearance: u16,
    /// Advertisement start retry settings
    pub retry: AdvertisingRetryConfig,
    /// Interval of the discovery monitoring log loop
    pub discovery_log_interval_secs: u64,
    /// Bounded wait for background tasks during stop
    pub shutdown_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            device_name: "BLE HID Bridge".to_string(),
            service_uuid: HID_SERVICE_UUID,
            advertising_interval_ms: 100,
            tx_power_dbm: 0,
            appearance: 0x03C0,
            retry: AdvertisingRetryConfig::default(),
            discovery_log_interval_secs: 30,
            shutdown_timeout_secs: 5,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_advertising_interval(mut self, interval: Duration) -> Self {
        self.advertising_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: AdvertisingRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn advertising_interval(&self) -> Duration {
        Duration::from_millis(self.advertising_interval_ms)
    }

    pub fn discovery_log_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_log_interval_secs.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn validate(&self) -> BlehidResult<()> {
        if self.device_name.trim().is_empty() {
            return Err(BlehidError::configuration("device name must not be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(BlehidError::configuration(
                "advertising retry attempts must be greater than 0",
            ));
        }
        if self.retry.poll_interval_ms == 0 || self.retry.status_timeout_ms == 0 {
            return Err(BlehidError::configuration(
                "advertising status poll interval and timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Health Monitor Configuration
// ----------------------------------------------------------------------------

/// Configuration for the health monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    /// Interval between monitoring ticks
    pub interval_secs: u64,
    /// Rolling window used for performance metrics
    pub metrics_window_secs: u64,
    /// Maximum operation records retained
    pub max_operation_records: usize,
    /// Maximum age of retained operation records
    pub retention_secs: u64,
    /// Timeout applied to each component health check
    pub check_timeout_secs: u64,
    /// Resident memory above which the process is considered degraded
    pub memory_warning_bytes: u64,
    /// Resident memory above which the process is considered critical
    pub memory_critical_bytes: u64,
    /// Breaker failure rate (percent) above which the transport is degraded
    pub failure_rate_warning_percent: f64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            metrics_window_secs: 300,
            max_operation_records: 10_000,
            retention_secs: 24 * 60 * 60,
            check_timeout_secs: 10,
            memory_warning_bytes: 512 * 1024 * 1024,
            memory_critical_bytes: 1024 * 1024 * 1024,
            failure_rate_warning_percent: 50.0,
        }
    }
}

impl HealthMonitorConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_max_operation_records(mut self, max: usize) -> Self {
        self.max_operation_records = max;
        self
    }

    pub fn with_memory_thresholds(mut self, warning: u64, critical: u64) -> Self {
        self.memory_warning_bytes = warning;
        self.memory_critical_bytes = critical;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs.max(1))
    }

    pub fn validate(&self) -> BlehidResult<()> {
        if self.max_operation_records == 0 {
            return Err(BlehidError::configuration(
                "health monitor must retain at least one operation record",
            ));
        }
        if self.memory_warning_bytes > self.memory_critical_bytes {
            return Err(BlehidError::configuration(
                "memory warning threshold must not exceed the critical threshold",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = AdvertisingRetryConfig::default();
        assert_eq!(retry.backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(retry.backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(retry.backoff_for_attempt(3), Duration::from_secs(8));
        assert_eq!(retry.backoff_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_hid_service_uuid() {
        assert_eq!(
            HID_SERVICE_UUID.to_string(),
            "00001812-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(CircuitBreakerConfig::default()
            .with_failure_threshold(0)
            .validate()
            .is_err());
        assert!(TransportConfig::default().validate().is_ok());
        assert!(TransportConfig::default()
            .with_device_name("  ")
            .validate()
            .is_err());
        assert!(HealthMonitorConfig::default()
            .with_memory_thresholds(10, 5)
            .validate()
            .is_err());
    }
}
