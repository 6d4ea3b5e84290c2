//! Advertisement manager
//!
//! Configuration-oriented facade over an [`AdvertisementBackend`]. The
//! manager owns the advertisement state machine, validates configuration
//! changes, runs optimization strategies and executes timed schedules.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{AdvertisementConfig, ValidationIssue};
use super::environment::{EnvironmentSampler, EnvironmentSnapshot, HIGH_INTERFERENCE};
use super::strategy::{Adaptive, AdvertisementStrategy, OptimizationGoals, StrategyOutcome};
use crate::errors::{BlehidError, BlehidResult};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Intervals below this are flagged when interference is high
const AGGRESSIVE_INTERVAL_MS: u64 = 100;

// ----------------------------------------------------------------------------
// Backend
// ----------------------------------------------------------------------------

/// Component that actually puts the advertisement on air
#[async_trait]
pub trait AdvertisementBackend: Send + Sync {
    async fn start_advertising(&self, config: &AdvertisementConfig) -> BlehidResult<()>;

    async fn stop_advertising(&self) -> BlehidResult<()>;

    /// Replace the parameters of a running advertisement
    async fn apply_configuration(&self, config: &AdvertisementConfig) -> BlehidResult<()>;
}

// ----------------------------------------------------------------------------
// State and Events
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdvertisementState {
    Stopped,
    Starting,
    Active,
    Stopping,
    Failed,
    Suspended,
}

impl fmt::Display for AdvertisementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdvertisementState::Stopped => "Stopped",
            AdvertisementState::Starting => "Starting",
            AdvertisementState::Active => "Active",
            AdvertisementState::Stopping => "Stopping",
            AdvertisementState::Failed => "Failed",
            AdvertisementState::Suspended => "Suspended",
        };
        f.write_str(name)
    }
}

/// Identifier of a scheduled advertising window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleId(pub u64);

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schedule-{}", self.0)
    }
}

/// Advertise for `duration`, starting `start_after` from now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start_after: Duration,
    pub duration: Duration,
    /// Configuration applied when the window opens
    pub config: Option<AdvertisementConfig>,
}

impl ScheduleWindow {
    pub fn new(start_after: Duration, duration: Duration) -> Self {
        Self {
            start_after,
            duration,
            config: None,
        }
    }

    pub fn with_config(mut self, config: AdvertisementConfig) -> Self {
        self.config = Some(config);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdvertisementConflict {
    /// Another advertiser nearby uses our local name
    DuplicateName { name: String, count: usize },
    /// Two schedule windows overlap in time
    OverlappingSchedules { first: ScheduleId, second: ScheduleId },
    /// Short interval while interference is high
    AggressiveInterval { interval_ms: u64, interference: f64 },
}

impl fmt::Display for AdvertisementConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertisementConflict::DuplicateName { name, count } => {
                write!(f, "{} nearby advertiser(s) also named {:?}", count, name)
            }
            AdvertisementConflict::OverlappingSchedules { first, second } => {
                write!(f, "{} overlaps {}", first, second)
            }
            AdvertisementConflict::AggressiveInterval {
                interval_ms,
                interference,
            } => write!(
                f,
                "{} ms interval under {:.0}% interference",
                interval_ms,
                interference * 100.0
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AdvertisementManagerEvent {
    StateChanged {
        from: AdvertisementState,
        to: AdvertisementState,
    },
    ConfigurationApplied {
        config: AdvertisementConfig,
        issues: Vec<ValidationIssue>,
    },
    Optimized {
        outcome: StrategyOutcome,
        applied: bool,
    },
    ScheduleOpened(ScheduleId),
    ScheduleClosed(ScheduleId),
}

/// Result of [`AdvertisementManager::optimize`]
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationReport {
    pub outcome: StrategyOutcome,
    pub applied: bool,
    pub issues: Vec<ValidationIssue>,
}

// ----------------------------------------------------------------------------
// Manager
// ----------------------------------------------------------------------------

struct ScheduleEntry {
    starts_at: Instant,
    ends_at: Instant,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: AdvertisementConfig,
    strategy: Arc<dyn AdvertisementStrategy>,
}

pub struct AdvertisementManager {
    backend: Arc<dyn AdvertisementBackend>,
    environment: Arc<dyn EnvironmentSampler>,
    /// Serialises state transitions and backend calls
    inner: tokio::sync::Mutex<Inner>,
    state: watch::Sender<AdvertisementState>,
    events: broadcast::Sender<AdvertisementManagerEvent>,
    schedules: Mutex<BTreeMap<ScheduleId, ScheduleEntry>>,
    next_schedule_id: AtomicU64,
}

impl AdvertisementManager {
    /// Create a stopped manager using the adaptive strategy.
    ///
    /// The initial configuration is normalized; corrections are logged.
    pub fn new(
        backend: Arc<dyn AdvertisementBackend>,
        environment: Arc<dyn EnvironmentSampler>,
        config: AdvertisementConfig,
    ) -> Self {
        let (config, issues) = config.normalized();
        for issue in &issues {
            warn!("Advertisement configuration corrected: {}", issue);
        }
        let (state, _) = watch::channel(AdvertisementState::Stopped);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            environment,
            inner: tokio::sync::Mutex::new(Inner {
                config,
                strategy: Arc::new(Adaptive),
            }),
            state,
            events,
            schedules: Mutex::new(BTreeMap::new()),
            next_schedule_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> AdvertisementState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<AdvertisementState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdvertisementManagerEvent> {
        self.events.subscribe()
    }

    pub async fn configuration(&self) -> AdvertisementConfig {
        self.inner.lock().await.config.clone()
    }

    pub async fn strategy_name(&self) -> &'static str {
        self.inner.lock().await.strategy.name()
    }

    fn transition(&self, to: AdvertisementState) {
        let from = self.state.send_replace(to);
        if from != to {
            debug!("Advertisement state {} -> {}", from, to);
            let _ = self
                .events
                .send(AdvertisementManagerEvent::StateChanged { from, to });
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start advertising. A no-op when already active.
    pub async fn start(&self) -> BlehidResult<()> {
        let inner = self.inner.lock().await;
        match self.state() {
            AdvertisementState::Active => {
                debug!("Advertisement already active");
                return Ok(());
            }
            AdvertisementState::Suspended => {
                return Err(BlehidError::advertisement(
                    "advertisement is suspended; resume it instead",
                ));
            }
            _ => {}
        }
        self.start_locked(&inner.config).await
    }

    async fn start_locked(&self, config: &AdvertisementConfig) -> BlehidResult<()> {
        self.transition(AdvertisementState::Starting);
        match self.backend.start_advertising(config).await {
            Ok(()) => {
                self.transition(AdvertisementState::Active);
                info!(
                    "Advertising {:?} every {} ms at {} dBm",
                    config.device_name, config.interval_ms, config.tx_power_dbm
                );
                Ok(())
            }
            Err(e) => {
                warn!("Advertisement start failed: {}", e);
                self.transition(AdvertisementState::Failed);
                Err(e)
            }
        }
    }

    /// Stop advertising. Always ends Stopped; backend errors are returned
    /// after the state change.
    pub async fn stop(&self) -> BlehidResult<()> {
        let _inner = self.inner.lock().await;
        if self.state() == AdvertisementState::Stopped {
            debug!("Advertisement already stopped");
            return Ok(());
        }

        let was_on_air = self.state() == AdvertisementState::Active;
        self.transition(AdvertisementState::Stopping);
        let result = if was_on_air {
            self.backend.stop_advertising().await
        } else {
            Ok(())
        };
        self.transition(AdvertisementState::Stopped);
        if let Err(e) = &result {
            warn!("Backend failed to stop advertising: {}", e);
        } else {
            info!("Advertising stopped");
        }
        result
    }

    /// Take the advertisement off air while keeping its configuration
    pub async fn suspend(&self) -> BlehidResult<()> {
        let _inner = self.inner.lock().await;
        match self.state() {
            AdvertisementState::Suspended => Ok(()),
            AdvertisementState::Active => {
                self.backend.stop_advertising().await?;
                self.transition(AdvertisementState::Suspended);
                info!("Advertising suspended");
                Ok(())
            }
            other => Err(BlehidError::advertisement(format!(
                "cannot suspend from {}",
                other
            ))),
        }
    }

    pub async fn resume(&self) -> BlehidResult<()> {
        let inner = self.inner.lock().await;
        match self.state() {
            AdvertisementState::Active => Ok(()),
            AdvertisementState::Suspended => self.start_locked(&inner.config).await,
            other => Err(BlehidError::advertisement(format!(
                "cannot resume from {}",
                other
            ))),
        }
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    /// Validate and store `config`, applying it live when active.
    ///
    /// Returns the corrections made during validation.
    pub async fn update_configuration(
        &self,
        config: AdvertisementConfig,
    ) -> BlehidResult<Vec<ValidationIssue>> {
        let mut inner = self.inner.lock().await;
        self.update_locked(&mut inner, config).await
    }

    async fn update_locked(
        &self,
        inner: &mut Inner,
        config: AdvertisementConfig,
    ) -> BlehidResult<Vec<ValidationIssue>> {
        let (config, issues) = config.normalized();
        for issue in &issues {
            warn!("Advertisement configuration corrected: {}", issue);
        }

        if self.state() == AdvertisementState::Active {
            self.backend.apply_configuration(&config).await?;
        }
        inner.config = config.clone();

        let _ = self
            .events
            .send(AdvertisementManagerEvent::ConfigurationApplied {
                config,
                issues: issues.clone(),
            });
        Ok(issues)
    }

    pub async fn set_strategy(&self, strategy: Arc<dyn AdvertisementStrategy>) {
        let mut inner = self.inner.lock().await;
        info!(
            "Advertisement strategy {} -> {}",
            inner.strategy.name(),
            strategy.name()
        );
        inner.strategy = strategy;
    }

    /// Run the active strategy against the sampled environment.
    ///
    /// The proposal is applied only when its confidence reaches
    /// `goals.min_confidence`.
    pub async fn optimize(&self, goals: &OptimizationGoals) -> BlehidResult<OptimizationReport> {
        let environment = self.environment.sample().await?;
        let mut inner = self.inner.lock().await;
        let outcome = inner.strategy.optimize(&inner.config, &environment, goals);

        let applied = outcome.confidence >= goals.min_confidence;
        let issues = if applied {
            self.update_locked(&mut inner, outcome.config.clone()).await?
        } else {
            debug!(
                "Strategy {} proposal below confidence threshold ({:.2} < {:.2})",
                outcome.strategy, outcome.confidence, goals.min_confidence
            );
            Vec::new()
        };

        info!(
            "Optimization by {}: {} (confidence {:.2}, applied: {})",
            outcome.strategy, outcome.rationale, outcome.confidence, applied
        );
        let _ = self.events.send(AdvertisementManagerEvent::Optimized {
            outcome: outcome.clone(),
            applied,
        });
        Ok(OptimizationReport {
            outcome,
            applied,
            issues,
        })
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    /// Schedule a timed advertising window on a background task
    pub fn schedule(self: &Arc<Self>, window: ScheduleWindow) -> ScheduleId {
        let id = ScheduleId(self.next_schedule_id.fetch_add(1, Ordering::Relaxed));
        let starts_at = Instant::now() + window.start_after;
        let ends_at = starts_at + window.duration;
        let cancel = CancellationToken::new();

        let manager = Arc::downgrade(self);
        let token = cancel.clone();

        // Held across the spawn: the window removes its own entry when it
        // finishes and must not run ahead of the insert
        let mut schedules = self.schedules.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = tokio::spawn(async move {
            Self::run_window(manager, id, window, token).await;
        });
        schedules.insert(
            id,
            ScheduleEntry {
                starts_at,
                ends_at,
                cancel,
                handle,
            },
        );
        drop(schedules);
        debug!("Scheduled advertising window {}", id);
        id
    }

    async fn run_window(
        manager: Weak<Self>,
        id: ScheduleId,
        window: ScheduleWindow,
        cancel: CancellationToken,
    ) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(window.start_after) => {}
        }

        let Some(this) = manager.upgrade() else { return };
        if let Some(config) = window.config {
            if let Err(e) = this.update_configuration(config).await {
                warn!("{}: failed to apply configuration: {}", id, e);
            }
        }
        if let Err(e) = this.start().await {
            warn!("{}: failed to start advertising: {}", id, e);
        }
        let _ = this.events.send(AdvertisementManagerEvent::ScheduleOpened(id));
        drop(this);

        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(window.duration) => false,
        };

        let Some(this) = manager.upgrade() else { return };
        if !cancelled {
            if let Err(e) = this.stop().await {
                warn!("{}: failed to stop advertising: {}", id, e);
            }
            let _ = this.events.send(AdvertisementManagerEvent::ScheduleClosed(id));
        }
        this.schedules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Cancel a pending or open window. The advertisement keeps its current
    /// state. Returns whether the window existed.
    pub fn cancel_schedule(&self, id: ScheduleId) -> bool {
        let entry = self
            .schedules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                debug!("Cancelled {}", id);
                true
            }
            None => false,
        }
    }

    pub fn scheduled(&self) -> Vec<ScheduleId> {
        self.schedules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    // ------------------------------------------------------------------------
    // Conflicts
    // ------------------------------------------------------------------------

    /// Report configuration and schedule conflicts for the current environment
    pub async fn detect_conflicts(&self) -> BlehidResult<Vec<AdvertisementConflict>> {
        let environment = self.environment.sample().await?;
        let config = self.configuration().await;
        let mut conflicts = Self::environment_conflicts(&config, &environment);

        let windows: Vec<(ScheduleId, Instant, Instant)> = self
            .schedules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, entry)| (*id, entry.starts_at, entry.ends_at))
            .collect();
        for (i, (first, first_start, first_end)) in windows.iter().enumerate() {
            for (second, second_start, second_end) in &windows[i + 1..] {
                if first_start < second_end && second_start < first_end {
                    conflicts.push(AdvertisementConflict::OverlappingSchedules {
                        first: *first,
                        second: *second,
                    });
                }
            }
        }

        for conflict in &conflicts {
            warn!("Advertisement conflict: {}", conflict);
        }
        Ok(conflicts)
    }

    fn environment_conflicts(
        config: &AdvertisementConfig,
        environment: &EnvironmentSnapshot,
    ) -> Vec<AdvertisementConflict> {
        let mut conflicts = Vec::new();

        let duplicates = environment
            .nearby_advertisers
            .iter()
            .filter(|adv| adv.name.as_deref() == Some(config.device_name.as_str()))
            .count();
        if duplicates > 0 {
            conflicts.push(AdvertisementConflict::DuplicateName {
                name: config.device_name.clone(),
                count: duplicates,
            });
        }

        if config.interval_ms < AGGRESSIVE_INTERVAL_MS
            && environment.interference_level > HIGH_INTERFERENCE
        {
            conflicts.push(AdvertisementConflict::AggressiveInterval {
                interval_ms: config.interval_ms,
                interference: environment.interference_level,
            });
        }
        conflicts
    }
}

impl Drop for AdvertisementManager {
    fn drop(&mut self) {
        let schedules = self.schedules.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in std::mem::take(schedules) {
            entry.cancel.cancel();
            entry.handle.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::environment::StaticEnvironment;
    use crate::advertisement::strategy::{Balanced, PerformanceOptimized};
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<String>>,
        fail_start: AtomicBool,
    }

    impl FakeBackend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AdvertisementBackend for FakeBackend {
        async fn start_advertising(&self, config: &AdvertisementConfig) -> BlehidResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("start:{}", config.interval_ms));
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(BlehidError::platform("radio busy"));
            }
            Ok(())
        }

        async fn stop_advertising(&self) -> BlehidResult<()> {
            self.calls.lock().unwrap().push("stop".to_string());
            Ok(())
        }

        async fn apply_configuration(&self, config: &AdvertisementConfig) -> BlehidResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("apply:{}", config.interval_ms));
            Ok(())
        }
    }

    fn manager_with(
        environment: EnvironmentSnapshot,
    ) -> (Arc<AdvertisementManager>, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::default());
        let manager = Arc::new(AdvertisementManager::new(
            backend.clone(),
            Arc::new(StaticEnvironment::new(environment)),
            AdvertisementConfig::default(),
        ));
        (manager, backend)
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (manager, backend) = manager_with(EnvironmentSnapshot::quiet());
        assert_eq!(manager.state(), AdvertisementState::Stopped);

        manager.start().await.unwrap();
        manager.start().await.unwrap();
        assert_eq!(manager.state(), AdvertisementState::Active);

        manager.suspend().await.unwrap();
        assert_eq!(manager.state(), AdvertisementState::Suspended);
        assert!(manager.start().await.is_err());

        manager.resume().await.unwrap();
        assert_eq!(manager.state(), AdvertisementState::Active);

        manager.stop().await.unwrap();
        manager.stop().await.unwrap();
        assert_eq!(manager.state(), AdvertisementState::Stopped);

        assert_eq!(
            backend.calls(),
            vec!["start:100", "stop", "start:100", "stop"]
        );
    }

    #[tokio::test]
    async fn test_failed_start_can_be_stopped_and_retried() {
        let (manager, backend) = manager_with(EnvironmentSnapshot::quiet());
        backend.fail_start.store(true, Ordering::SeqCst);

        assert!(manager.start().await.is_err());
        assert_eq!(manager.state(), AdvertisementState::Failed);
        assert!(manager.suspend().await.is_err());

        backend.fail_start.store(false, Ordering::SeqCst);
        manager.start().await.unwrap();
        assert_eq!(manager.state(), AdvertisementState::Active);
    }

    #[tokio::test]
    async fn test_update_applies_live_only_when_active() {
        let (manager, backend) = manager_with(EnvironmentSnapshot::quiet());

        let issues = manager
            .update_configuration(AdvertisementConfig::default().with_interval(Duration::from_millis(5)))
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert!(backend.calls().is_empty());

        manager.start().await.unwrap();
        manager
            .update_configuration(AdvertisementConfig::default().with_interval(Duration::from_millis(500)))
            .await
            .unwrap();
        assert_eq!(backend.calls(), vec!["start:100", "apply:500"]);
        assert_eq!(manager.configuration().await.interval_ms, 500);
    }

    #[tokio::test]
    async fn test_optimize_respects_confidence() {
        let (manager, _backend) = manager_with(EnvironmentSnapshot::quiet());
        manager.set_strategy(Arc::new(Balanced)).await;

        let report = manager.optimize(&OptimizationGoals::default()).await.unwrap();
        assert!(report.applied);
        assert_eq!(manager.configuration().await.interval_ms, 250);

        manager.set_strategy(Arc::new(PerformanceOptimized)).await;
        let strict = OptimizationGoals {
            min_confidence: 0.95,
            ..OptimizationGoals::default()
        };
        let report = manager.optimize(&strict).await.unwrap();
        assert!(!report.applied);
        assert_eq!(manager.configuration().await.interval_ms, 250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_window_runs_and_closes() {
        let (manager, backend) = manager_with(EnvironmentSnapshot::quiet());
        let id = manager.schedule(ScheduleWindow::new(
            Duration::from_secs(10),
            Duration::from_secs(30),
        ));
        assert_eq!(manager.scheduled(), vec![id]);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(manager.state(), AdvertisementState::Active);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(manager.state(), AdvertisementState::Stopped);
        assert!(manager.scheduled().is_empty());
        assert_eq!(backend.calls(), vec!["start:100", "stop"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_immediate_windows_leave_no_entries() {
        let (manager, _backend) = manager_with(EnvironmentSnapshot::quiet());
        for _ in 0..20 {
            manager.schedule(ScheduleWindow::new(Duration::ZERO, Duration::ZERO));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while !manager.scheduled().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("finished windows left entries behind");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_schedule_never_fires() {
        let (manager, backend) = manager_with(EnvironmentSnapshot::quiet());
        let id = manager.schedule(ScheduleWindow::new(
            Duration::from_secs(10),
            Duration::from_secs(30),
        ));
        assert!(manager.cancel_schedule(id));
        assert!(!manager.cancel_schedule(id));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_detection() {
        let noisy = EnvironmentSnapshot::quiet()
            .with_interference(0.9)
            .with_advertiser("BLE HID Bridge");
        let (manager, _backend) = manager_with(noisy);
        manager
            .update_configuration(AdvertisementConfig::default().with_interval(Duration::from_millis(30)))
            .await
            .unwrap();

        let first = manager.schedule(ScheduleWindow::new(Duration::from_secs(10), Duration::from_secs(60)));
        let second = manager.schedule(ScheduleWindow::new(Duration::from_secs(30), Duration::from_secs(10)));
        manager.schedule(ScheduleWindow::new(Duration::from_secs(600), Duration::from_secs(10)));

        let conflicts = manager.detect_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 3);
        assert!(conflicts.contains(&AdvertisementConflict::DuplicateName {
            name: "BLE HID Bridge".to_string(),
            count: 1,
        }));
        assert!(conflicts.contains(&AdvertisementConflict::OverlappingSchedules { first, second }));
        assert!(conflicts
            .iter()
            .any(|c| matches!(c, AdvertisementConflict::AggressiveInterval { interval_ms: 30, .. })));
    }
}
