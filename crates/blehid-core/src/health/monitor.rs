//! Periodic health monitor
//!
//! The monitor collects operation outcomes through [`OperationRecorder`],
//! runs every registered [`HealthCheck`] on each tick and folds the results
//! into a [`HealthReport`]. It is never on the report delivery path.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::checks::{AdapterHealthCheck, CircuitBreakerHealthCheck, HealthCheck, MemoryHealthCheck};
use super::metrics::{OperationLog, OperationRecord, OperationRecorder, PerformanceMetrics};
use super::status::{ComponentHealthResult, HealthEvent, HealthReport, HealthStatus};
use super::system::{ProcessSampler, ResourceSampler};
use crate::adapter::AdapterProbe;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::HealthMonitorConfig;
use crate::types::Timestamp;

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Health and performance monitor for the transport
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    operations: OperationLog,
    checks: RwLock<BTreeMap<String, Arc<dyn HealthCheck>>>,
    breaker: Option<Arc<CircuitBreaker>>,
    adapter: Option<Arc<dyn AdapterProbe>>,
    sampler: Arc<dyn ResourceSampler>,
    custom_metrics: RwLock<BTreeMap<String, f64>>,
    last_status: Mutex<Option<HealthStatus>>,
    latest: Mutex<Option<HealthReport>>,
    events: broadcast::Sender<HealthEvent>,
    worker: Mutex<Option<Worker>>,
}

impl HealthMonitor {
    /// Create a monitor with the process memory check registered
    pub fn new(config: HealthMonitorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let monitor = Self {
            operations: OperationLog::new(config.max_operation_records, config.retention()),
            config,
            checks: RwLock::new(BTreeMap::new()),
            breaker: None,
            adapter: None,
            sampler: Arc::new(ProcessSampler::new()),
            custom_metrics: RwLock::new(BTreeMap::new()),
            last_status: Mutex::new(None),
            latest: Mutex::new(None),
            events,
            worker: Mutex::new(None),
        };
        monitor.register_memory_check();
        monitor
    }

    /// Observe a circuit breaker and register its health check
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.register_check(
            CircuitBreakerHealthCheck::NAME,
            Arc::new(CircuitBreakerHealthCheck::new(
                breaker.clone(),
                self.config.failure_rate_warning_percent,
            )),
        );
        self.breaker = Some(breaker);
        self
    }

    /// Observe the adapter and register its health check
    pub fn with_adapter_probe(mut self, probe: Arc<dyn AdapterProbe>) -> Self {
        self.register_check(
            AdapterHealthCheck::NAME,
            Arc::new(AdapterHealthCheck::new(probe.clone())),
        );
        self.adapter = Some(probe);
        self
    }

    /// Replace the process resource sampler
    pub fn with_resource_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = sampler;
        self.register_memory_check();
        self
    }

    fn register_memory_check(&self) {
        self.register_check(
            MemoryHealthCheck::NAME,
            Arc::new(MemoryHealthCheck::new(
                self.sampler.clone(),
                self.config.memory_warning_bytes,
                self.config.memory_critical_bytes,
            )),
        );
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------------

    /// Register (or replace) a named health check
    pub fn register_check(&self, name: impl Into<String>, check: Arc<dyn HealthCheck>) {
        let name = name.into();
        let mut checks = self.checks.write().unwrap_or_else(PoisonError::into_inner);
        if checks.insert(name.clone(), check).is_some() {
            debug!("Replaced health check {}", name);
        } else {
            debug!("Registered health check {}", name);
        }
    }

    /// Remove a named health check; returns whether it existed
    pub fn unregister_check(&self, name: &str) -> bool {
        self.checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn check_names(&self) -> Vec<String> {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Set an application-defined metric included in every report
    pub fn set_custom_metric(&self, name: impl Into<String>, value: f64) {
        self.custom_metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value);
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Spawn the periodic monitoring loop. Starting twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            debug!("Health monitor already running");
            return;
        }

        let cancel = CancellationToken::new();
        let monitor = Arc::clone(self);
        let token = cancel.clone();
        let interval = self.config.interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = monitor.run_once().await;
                        debug!("Health tick complete: {}", report.overall);
                    }
                }
            }
            debug!("Health monitor loop exited");
        });

        info!("Health monitor started (interval {:?})", interval);
        *worker = Some(Worker { cancel, handle });
    }

    /// Cancel the monitoring loop and wait for it to exit
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                warn!("Health monitor loop ended abnormally: {}", e);
            }
            info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Report produced by the most recent tick
    pub fn latest_report(&self) -> Option<HealthReport> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// Perform one monitoring tick
    pub async fn run_once(&self) -> HealthReport {
        let metrics = self.compute_metrics().await;
        let components = self.run_checks().await;
        let overall = HealthStatus::worst(components.iter().map(|c| c.status));

        let report = HealthReport {
            overall,
            components,
            metrics,
            generated_at: Timestamp::now(),
        };

        let previous = self
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(overall);
        if previous != Some(overall) {
            match previous {
                Some(prev) if overall > prev => {
                    warn!("Health status changed: {} -> {}", prev, overall)
                }
                Some(prev) => info!("Health status changed: {} -> {}", prev, overall),
                None => info!("Health status: {}", overall),
            }
            let _ = self.events.send(HealthEvent::StatusChanged {
                previous,
                current: overall,
                report: Box::new(report.clone()),
            });
        }
        let _ = self
            .events
            .send(HealthEvent::MetricsUpdated(Box::new(report.metrics.clone())));

        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        report
    }

    async fn compute_metrics(&self) -> PerformanceMetrics {
        let window = self.config.metrics_window();
        let records = self.operations.window(window);
        let mut metrics =
            PerformanceMetrics::from_records(&records, window).with_resources(self.sampler.sample());

        if let Some(breaker) = &self.breaker {
            metrics.circuit_breaker_state = breaker.state().to_string();
        }
        if let Some(adapter) = &self.adapter {
            metrics.adapter_status =
                match tokio::time::timeout(self.config.check_timeout(), adapter.adapter_status()).await {
                    Ok(Ok(status)) => status.summary(),
                    Ok(Err(e)) => format!("error: {}", e),
                    Err(_) => "timeout".to_string(),
                };
        }
        metrics.custom = self
            .custom_metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        metrics
    }

    async fn run_checks(&self) -> Vec<ComponentHealthResult> {
        let checks: Vec<(String, Arc<dyn HealthCheck>)> = self
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, check)| (name.clone(), check.clone()))
            .collect();

        let timeout = self.config.check_timeout();
        let runs = checks.into_iter().map(|(name, check)| {
            let started = Instant::now();
            let handle = tokio::spawn(async move { tokio::time::timeout(timeout, check.check()).await });
            async move {
                let joined = handle.await;
                let elapsed = started.elapsed();
                let mut result = match joined {
                    Ok(Ok(Ok(result))) => result,
                    Ok(Ok(Err(e))) => {
                        warn!("Health check {} failed: {}", name, e);
                        ComponentHealthResult::critical(name.clone(), "Health check failed")
                            .with_error(e.to_string())
                    }
                    Ok(Err(_)) => {
                        warn!("Health check {} timed out after {:?}", name, timeout);
                        ComponentHealthResult::critical(name.clone(), "Health check timed out")
                            .with_error(format!("timed out after {:?}", timeout))
                    }
                    Err(e) => {
                        error!("Health check {} panicked: {}", name, e);
                        ComponentHealthResult::critical(name.clone(), "Health check panicked")
                            .with_error(e.to_string())
                    }
                };
                result.component = name;
                result.duration = elapsed;
                result
            }
        });

        join_all(runs).await
    }

    /// Number of operation records currently retained
    pub fn recorded_operations(&self) -> usize {
        self.operations.len()
    }

    fn record(&self, operation: &str, success: bool, duration: Duration, error: Option<&str>) {
        self.operations.push(OperationRecord {
            operation: operation.to_string(),
            success,
            duration,
            error: error.map(str::to_string),
            recorded_at: Instant::now(),
            timestamp: Timestamp::now(),
        });
    }
}

impl OperationRecorder for HealthMonitor {
    fn record_success(&self, operation: &str, duration: Duration) {
        self.record(operation, true, duration, None);
    }

    fn record_failure(&self, operation: &str, duration: Duration, error: &str) {
        self.record(operation, false, duration, Some(error));
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("checks", &self.check_names())
            .field("running", &self.is_running())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
