//! Operation records and rolling performance metrics

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Operation Recording
// ----------------------------------------------------------------------------

/// Instrumentation hook for components that perform transport operations
pub trait OperationRecorder: Send + Sync {
    fn record_success(&self, operation: &str, duration: Duration);

    fn record_failure(&self, operation: &str, duration: Duration, error: &str);
}

/// Recorder that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl OperationRecorder for NoopRecorder {
    fn record_success(&self, _operation: &str, _duration: Duration) {}

    fn record_failure(&self, _operation: &str, _duration: Duration, _error: &str) {}
}

/// A single recorded operation outcome
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    pub operation: String,
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
    pub recorded_at: Instant,
    pub timestamp: Timestamp,
}

/// Bounded, concurrently writable buffer of operation records.
///
/// Oldest records are dropped once `max_records` is exceeded or when they are
/// older than `retention`.
#[derive(Debug)]
pub struct OperationLog {
    records: Mutex<VecDeque<OperationRecord>>,
    max_records: usize,
    retention: Duration,
}

impl OperationLog {
    pub fn new(max_records: usize, retention: Duration) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records: max_records.max(1),
            retention,
        }
    }

    pub fn push(&self, record: OperationRecord) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.push_back(record);
        while records.len() > self.max_records {
            records.pop_front();
        }
        Self::prune_expired(&mut records, self.retention);
    }

    /// Records completed within `window` of now
    pub fn window(&self, window: Duration) -> Vec<OperationRecord> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Self::prune_expired(&mut records, self.retention);
        let now = Instant::now();
        records
            .iter()
            .filter(|r| now.saturating_duration_since(r.recorded_at) <= window)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn prune_expired(records: &mut VecDeque<OperationRecord>, retention: Duration) {
        let now = Instant::now();
        while let Some(front) = records.front() {
            if now.saturating_duration_since(front.recorded_at) > retention {
                records.pop_front();
            } else {
                break;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Performance Metrics
// ----------------------------------------------------------------------------

/// Process resource usage at sampling time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_bytes: Option<u64>,
    pub cpu_percent: Option<f64>,
}

/// Rolling-window aggregate computed on every monitoring tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub window: Duration,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    /// Percentage of successful operations; 100 when nothing was recorded
    pub success_rate: f64,
    pub average_latency: Duration,
    pub p95_latency: Duration,
    /// Operations per second over the window
    pub throughput: f64,
    pub operations_by_type: BTreeMap<String, u64>,
    pub memory_bytes: Option<u64>,
    pub cpu_percent: Option<f64>,
    pub adapter_status: String,
    pub circuit_breaker_state: String,
    pub custom: BTreeMap<String, f64>,
    pub computed_at: Timestamp,
}

impl PerformanceMetrics {
    /// Aggregate a window of records
    pub fn from_records(records: &[OperationRecord], window: Duration) -> Self {
        let total = records.len() as u64;
        let successful = records.iter().filter(|r| r.success).count() as u64;
        let failed = total - successful;

        let success_rate = if total == 0 {
            100.0
        } else {
            successful as f64 / total as f64 * 100.0
        };

        let mut latencies: Vec<Duration> = records.iter().map(|r| r.duration).collect();
        latencies.sort_unstable();

        let average_latency = if latencies.is_empty() {
            Duration::ZERO
        } else {
            latencies.iter().sum::<Duration>() / latencies.len() as u32
        };
        let p95_latency = percentile(&latencies, 95.0);

        let throughput = if window.is_zero() {
            0.0
        } else {
            total as f64 / window.as_secs_f64()
        };

        let mut operations_by_type = BTreeMap::new();
        for record in records {
            *operations_by_type.entry(record.operation.clone()).or_insert(0) += 1;
        }

        Self {
            window,
            total_operations: total,
            successful_operations: successful,
            failed_operations: failed,
            success_rate,
            average_latency,
            p95_latency,
            throughput,
            operations_by_type,
            memory_bytes: None,
            cpu_percent: None,
            adapter_status: "unknown".to_string(),
            circuit_breaker_state: "unknown".to_string(),
            custom: BTreeMap::new(),
            computed_at: Timestamp::now(),
        }
    }

    pub fn with_resources(mut self, usage: ResourceUsage) -> Self {
        self.memory_bytes = usage.memory_bytes;
        self.cpu_percent = usage.cpu_percent;
        self
    }
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(op: &str, success: bool, millis: u64) -> OperationRecord {
        OperationRecord {
            operation: op.to_string(),
            success,
            duration: Duration::from_millis(millis),
            error: (!success).then(|| "failed".to_string()),
            recorded_at: Instant::now(),
            timestamp: Timestamp::now(),
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let samples: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        assert_eq!(percentile(&samples, 95.0), Duration::from_millis(95));
        assert_eq!(percentile(&samples[..1], 95.0), Duration::from_millis(1));
        assert_eq!(percentile(&[], 95.0), Duration::ZERO);
    }

    #[test]
    fn test_metrics_from_records() {
        let records = vec![
            record("notify", true, 10),
            record("notify", true, 20),
            record("notify", false, 30),
            record("create_service", true, 40),
        ];
        let metrics = PerformanceMetrics::from_records(&records, Duration::from_secs(2));
        assert_eq!(metrics.total_operations, 4);
        assert_eq!(metrics.failed_operations, 1);
        assert_eq!(metrics.success_rate, 75.0);
        assert_eq!(metrics.average_latency, Duration::from_millis(25));
        assert_eq!(metrics.p95_latency, Duration::from_millis(40));
        assert_eq!(metrics.throughput, 2.0);
        assert_eq!(metrics.operations_by_type.get("notify"), Some(&3));
    }

    #[test]
    fn test_empty_metrics_are_fully_successful() {
        let metrics = PerformanceMetrics::from_records(&[], Duration::from_secs(300));
        assert_eq!(metrics.success_rate, 100.0);
        assert_eq!(metrics.throughput, 0.0);
    }

    #[tokio::test]
    async fn test_log_drops_oldest_beyond_capacity() {
        let log = OperationLog::new(3, Duration::from_secs(60));
        for i in 0..5 {
            log.push(record(&format!("op{}", i), true, 1));
        }
        let records = log.window(Duration::from_secs(60));
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].operation, "op2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_window_and_retention() {
        let log = OperationLog::new(100, Duration::from_secs(600));
        log.push(record("old", true, 1));
        tokio::time::advance(Duration::from_secs(400)).await;
        log.push(record("recent", true, 1));

        let window = log.window(Duration::from_secs(300));
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].operation, "recent");
        assert_eq!(log.len(), 2);

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(log.window(Duration::from_secs(1_000)).len() == 1);
        assert_eq!(log.len(), 1);
    }
}
