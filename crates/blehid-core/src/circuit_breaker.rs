//! Circuit breaker for transport operations
//!
//! Wraps arbitrary async operations and decides admission based on recent
//! failures. The breaker moves between three states:
//!
//! - `Closed`: every call is admitted; consecutive failures are counted and the
//!   circuit opens once they reach the configured threshold.
//! - `Open`: calls are rejected with [`CircuitOpenError`] until the recovery
//!   timeout has elapsed since the last failure. The next call after that
//!   moves the breaker to `HalfOpen` (lazily, there is no timer).
//! - `HalfOpen`: a bounded number of trial calls are admitted. One success
//!   closes the circuit, one failure reopens it.
//!
//! The compound (state, failure count, last failure) triple is guarded by a
//! single mutex. High-frequency counters are atomics and execution-time samples
//! live in a lock-free bounded ring.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::errors::{BlehidError, CircuitOpenError};

/// Number of execution-time samples kept for the rolling average
pub const EXECUTION_SAMPLE_WINDOW: usize = 100;

const TRANSITION_CHANNEL_CAPACITY: usize = 32;

// ----------------------------------------------------------------------------
// State and Metrics
// ----------------------------------------------------------------------------

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("Closed"),
            CircuitState::Open => f.write_str("Open"),
            CircuitState::HalfOpen => f.write_str("HalfOpen"),
        }
    }
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    /// Failures as a percentage of completed calls
    pub failure_rate: f64,
    pub last_failure_at: Option<Instant>,
    /// Earliest admission instant while open
    pub next_retry_at: Option<Instant>,
    pub time_in_state: Duration,
    /// Mean execution time over the last [`EXECUTION_SAMPLE_WINDOW`] calls
    pub average_execution_time: Duration,
    pub sample_count: usize,
}

/// A state change, broadcast to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: Instant,
}

/// Error returned by [`CircuitBreaker::execute`]
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The breaker refused to admit the call
    #[error(transparent)]
    Open(CircuitOpenError),
    /// The cancellation token fired before the operation completed
    #[error("Operation cancelled")]
    Cancelled,
    /// The operation ran and failed; the failure has been recorded
    #[error("{0}")]
    Operation(E),
}

impl From<CircuitBreakerError<BlehidError>> for BlehidError {
    fn from(err: CircuitBreakerError<BlehidError>) -> Self {
        match err {
            CircuitBreakerError::Open(open) => BlehidError::CircuitOpen(open),
            CircuitBreakerError::Cancelled => BlehidError::Cancelled,
            CircuitBreakerError::Operation(inner) => inner,
        }
    }
}

// ----------------------------------------------------------------------------
// Circuit Breaker
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    half_open_admitted: u32,
    state_entered_at: Instant,
}

/// Failure-isolation gate for async operations
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    core: Mutex<BreakerCore>,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
    samples: SampleWindow,
    transitions: broadcast::Sender<CircuitTransition>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            config,
            core: Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                half_open_admitted: 0,
                state_entered_at: Instant::now(),
            }),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            samples: SampleWindow::new(EXECUTION_SAMPLE_WINDOW),
            transitions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` if the breaker admits it.
    ///
    /// The operation's own error is recorded and handed back unchanged in
    /// [`CircuitBreakerError::Operation`]. Cancellation counts as neither a
    /// success nor a failure.
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if cancel.is_cancelled() {
            return Err(CircuitBreakerError::Cancelled);
        }

        let admission = self.try_acquire().map_err(CircuitBreakerError::Open)?;

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = operation() => Some(result),
        };
        self.record_sample(started.elapsed());

        match outcome {
            None => {
                self.release(admission);
                Err(CircuitBreakerError::Cancelled)
            }
            Some(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Some(Err(err)) => {
                self.on_failure();
                Err(CircuitBreakerError::Operation(err))
            }
        }
    }

    /// Current state without triggering the lazy Open → HalfOpen transition
    pub fn state(&self) -> CircuitState {
        self.lock_core().state
    }

    /// Whether a call made now would be admitted
    pub fn is_call_permitted(&self) -> bool {
        let core = self.lock_core();
        match core.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => core.half_open_admitted < self.config.half_open_max_attempts,
            CircuitState::Open => Instant::now() >= self.retry_at(&core),
        }
    }

    /// Snapshot of the breaker's counters and timing
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let (state, consecutive_failures, last_failure_at, next_retry_at, time_in_state) = {
            let core = self.lock_core();
            let next_retry_at = match core.state {
                CircuitState::Open => Some(self.retry_at(&core)),
                _ => None,
            };
            (
                core.state,
                core.consecutive_failures,
                core.last_failure_at,
                next_retry_at,
                core.state_entered_at.elapsed(),
            )
        };

        let total_successes = self.total_successes.load(Ordering::Relaxed);
        let total_failures = self.total_failures.load(Ordering::Relaxed);
        let completed = total_successes + total_failures;
        let failure_rate = if completed == 0 {
            0.0
        } else {
            total_failures as f64 / completed as f64 * 100.0
        };

        let (average_execution_time, sample_count) = self.samples.average();

        CircuitBreakerMetrics {
            name: self.name.clone(),
            state,
            consecutive_failures,
            total_successes,
            total_failures,
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            failure_rate,
            last_failure_at,
            next_retry_at,
            time_in_state,
            average_execution_time,
            sample_count,
        }
    }

    /// Subscribe to state transitions
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<CircuitTransition> {
        self.transitions.subscribe()
    }

    /// Force the circuit open; the recovery timeout starts now
    pub fn open(&self) {
        let mut core = self.lock_core();
        core.last_failure_at = Some(Instant::now());
        self.transition(&mut core, CircuitState::Open);
    }

    /// Force the circuit closed
    pub fn close(&self) {
        let mut core = self.lock_core();
        self.transition(&mut core, CircuitState::Closed);
    }

    /// Force the circuit half-open with a fresh trial budget
    pub fn half_open(&self) {
        let mut core = self.lock_core();
        self.transition(&mut core, CircuitState::HalfOpen);
    }

    /// Return to a pristine closed breaker, clearing all counters
    pub fn reset(&self) {
        {
            let mut core = self.lock_core();
            self.transition(&mut core, CircuitState::Closed);
            core.consecutive_failures = 0;
            core.last_failure_at = None;
            core.half_open_admitted = 0;
            core.state_entered_at = Instant::now();
        }
        self.total_successes.store(0, Ordering::Relaxed);
        self.total_failures.store(0, Ordering::Relaxed);
        self.total_rejections.store(0, Ordering::Relaxed);
        self.samples.clear();
        info!("Circuit breaker '{}' reset", self.name);
    }

    // ------------------------------------------------------------------------
    // Internal state machine
    // ------------------------------------------------------------------------

    fn lock_core(&self) -> MutexGuard<'_, BreakerCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retry_at(&self, core: &BreakerCore) -> Instant {
        let reference = core.last_failure_at.unwrap_or(core.state_entered_at);
        reference + self.config.recovery_timeout()
    }

    fn try_acquire(&self) -> Result<Admission, CircuitOpenError> {
        let mut core = self.lock_core();
        let now = Instant::now();

        match core.state {
            CircuitState::Closed => Ok(Admission::Closed),
            CircuitState::Open => {
                let retry_at = self.retry_at(&core);
                if now >= retry_at {
                    self.transition(&mut core, CircuitState::HalfOpen);
                    core.half_open_admitted = 1;
                    Ok(Admission::HalfOpen)
                } else {
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Circuit breaker '{}' rejected call, retry in {}ms",
                        self.name,
                        (retry_at - now).as_millis()
                    );
                    Err(CircuitOpenError {
                        state: CircuitState::Open,
                        next_retry_at: Some(retry_at),
                        retry_after: retry_at - now,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if core.half_open_admitted < self.config.half_open_max_attempts {
                    core.half_open_admitted += 1;
                    Ok(Admission::HalfOpen)
                } else {
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Circuit breaker '{}' rejected call, half-open trial budget exhausted",
                        self.name
                    );
                    Err(CircuitOpenError {
                        state: CircuitState::HalfOpen,
                        next_retry_at: None,
                        retry_after: Duration::ZERO,
                    })
                }
            }
        }
    }

    fn release(&self, admission: Admission) {
        if admission == Admission::HalfOpen {
            let mut core = self.lock_core();
            if core.state == CircuitState::HalfOpen {
                core.half_open_admitted = core.half_open_admitted.saturating_sub(1);
            }
        }
    }

    fn on_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let mut core = self.lock_core();
        match core.state {
            CircuitState::HalfOpen => {
                self.transition(&mut core, CircuitState::Closed);
            }
            CircuitState::Closed => {
                core.consecutive_failures = 0;
            }
            // A manual open raced with an in-flight call; the override wins.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut core = self.lock_core();
        core.consecutive_failures = core.consecutive_failures.saturating_add(1);
        core.last_failure_at = Some(Instant::now());

        match core.state {
            CircuitState::Closed => {
                if core.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker '{}' opening after {} consecutive failures",
                        self.name, core.consecutive_failures
                    );
                    self.transition(&mut core, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker '{}' trial call failed, reopening", self.name);
                self.transition(&mut core, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, core: &mut BreakerCore, to: CircuitState) {
        let from = core.state;
        if from == to {
            return;
        }

        let now = Instant::now();
        core.state = to;
        core.state_entered_at = now;
        core.half_open_admitted = 0;
        if to == CircuitState::Closed {
            core.consecutive_failures = 0;
        }

        info!("Circuit breaker '{}' transitioned {} -> {}", self.name, from, to);
        let _ = self.transitions.send(CircuitTransition { from, to, at: now });
    }

    fn record_sample(&self, elapsed: Duration) {
        self.samples.record(elapsed);
    }
}

// ----------------------------------------------------------------------------
// Execution Samples
// ----------------------------------------------------------------------------

/// Fixed-size ring of execution times in nanoseconds.
///
/// Writers claim a slot with one `fetch_add` and overwrite the oldest sample;
/// neither writers nor readers take a lock. A reader racing a writer may see
/// the slot's previous value.
#[derive(Debug)]
struct SampleWindow {
    slots: Box<[AtomicU64]>,
    written: AtomicUsize,
}

impl SampleWindow {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity.max(1)).map(|_| AtomicU64::new(0)).collect(),
            written: AtomicUsize::new(0),
        }
    }

    fn record(&self, elapsed: Duration) {
        let slot = self.written.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.slots[slot].store(nanos, Ordering::Relaxed);
    }

    fn len(&self) -> usize {
        self.written.load(Ordering::Relaxed).min(self.slots.len())
    }

    /// Mean of the retained samples and their count
    fn average(&self) -> (Duration, usize) {
        let count = self.len();
        if count == 0 {
            return (Duration::ZERO, 0);
        }
        let total: u128 = self.slots[..count]
            .iter()
            .map(|slot| u128::from(slot.load(Ordering::Relaxed)))
            .sum();
        let mean = u64::try_from(total / count as u128).unwrap_or(u64::MAX);
        (Duration::from_nanos(mean), count)
    }

    fn clear(&self) {
        self.written.store(0, Ordering::Relaxed);
        for slot in self.slots.iter() {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Closed,
    HalfOpen,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn breaker(threshold: u32, recovery_secs: u64, half_open: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::new()
                .with_failure_threshold(threshold)
                .with_recovery_timeout(Duration::from_secs(recovery_secs))
                .with_half_open_max_attempts(half_open),
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        breaker
            .execute(&CancellationToken::new(), || async { Err::<(), _>("boom") })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, CircuitBreakerError<&'static str>> {
        breaker
            .execute(&CancellationToken::new(), || async { Ok::<_, &'static str>(7) })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_and_rejects() {
        let breaker = breaker(3, 30, 1);

        for _ in 0..2 {
            assert!(matches!(fail(&breaker).await, Err(CircuitBreakerError::Operation("boom"))));
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        match succeed(&breaker).await {
            Err(CircuitBreakerError::Open(open)) => {
                assert_eq!(open.state, CircuitState::Open);
                assert!(open.next_retry_at.is_some());
                assert_eq!(open.retry_after, Duration::from_secs(30));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(breaker.metrics().total_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_counter() {
        let breaker = breaker(3, 30, 1);
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        assert_eq!(breaker.metrics().consecutive_failures, 2);

        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.metrics().consecutive_failures, 0);

        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_timeout_boundary() {
        let breaker = breaker(1, 10, 1);
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert!(matches!(succeed(&breaker).await, Err(CircuitBreakerError::Open(_))));
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(2)).await;
        let cancel = CancellationToken::new();
        let observed = breaker
            .execute(&cancel, || async {
                Ok::<_, &'static str>(breaker.state())
            })
            .await
            .unwrap();
        assert_eq!(observed, CircuitState::HalfOpen);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes_regardless_of_budget() {
        let breaker = breaker(2, 5, 3);
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_timestamp() {
        let breaker = breaker(1, 5, 2);
        fail(&breaker).await.ok();
        tokio::time::advance(Duration::from_secs(6)).await;

        let before = Instant::now();
        fail(&breaker).await.ok();
        let metrics = breaker.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        assert!(metrics.last_failure_at.unwrap() >= before);
        assert_eq!(metrics.next_retry_at.unwrap(), before + Duration::from_secs(5));

        assert!(matches!(succeed(&breaker).await, Err(CircuitBreakerError::Open(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_budget_exhaustion_rejects() {
        let breaker = Arc::new(breaker(1, 1, 1));
        fail(&breaker).await.ok();
        tokio::time::advance(Duration::from_secs(2)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute(&CancellationToken::new(), || async move {
                        release_rx.await.ok();
                        Ok::<_, &'static str>(())
                    })
                    .await
            })
        };
        for _ in 0..10 {
            if breaker.state() == CircuitState::HalfOpen {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        match succeed(&breaker).await {
            Err(CircuitBreakerError::Open(open)) => assert_eq!(open.state, CircuitState::HalfOpen),
            other => panic!("expected half-open rejection, got {:?}", other),
        }

        release_tx.send(()).ok();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_failure() {
        let breaker = breaker(1, 30, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = breaker
            .execute(&cancel, || async { Err::<(), _>("never runs") })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Cancelled)));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_overrides_and_reset() {
        let breaker = breaker(5, 30, 1);
        let mut transitions = breaker.subscribe_transitions();

        breaker.open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_call_permitted());
        breaker.half_open();
        assert!(breaker.is_call_permitted());
        breaker.close();
        assert_eq!(breaker.state(), CircuitState::Closed);

        let first = transitions.recv().await.unwrap();
        assert_eq!((first.from, first.to), (CircuitState::Closed, CircuitState::Open));

        succeed(&breaker).await.unwrap();
        fail(&breaker).await.ok();
        breaker.reset();
        let metrics = breaker.metrics();
        assert_eq!(metrics.total_successes, 0);
        assert_eq!(metrics.total_failures, 0);
        assert_eq!(metrics.sample_count, 0);
        assert_eq!(metrics.failure_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_track_execution_time() {
        let breaker = breaker(5, 30, 1);
        for _ in 0..3 {
            breaker
                .execute(&CancellationToken::new(), || async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, &'static str>(())
                })
                .await
                .unwrap();
        }
        fail(&breaker).await.ok();

        let metrics = breaker.metrics();
        assert_eq!(metrics.sample_count, 4);
        assert_eq!(metrics.total_successes, 3);
        assert_eq!(metrics.failure_rate, 25.0);
        assert!(metrics.average_execution_time >= Duration::from_millis(7));
    }

    #[test]
    fn test_sample_window_keeps_latest_samples() {
        let breaker = breaker(5, 30, 1);
        for _ in 0..150 {
            breaker.record_sample(Duration::from_millis(1));
        }
        for _ in 0..EXECUTION_SAMPLE_WINDOW {
            breaker.record_sample(Duration::from_millis(3));
        }

        let metrics = breaker.metrics();
        assert_eq!(metrics.sample_count, EXECUTION_SAMPLE_WINDOW);
        assert_eq!(metrics.average_execution_time, Duration::from_millis(3));
    }

    proptest! {
        #[test]
        fn prop_open_after_threshold_failures(threshold in 1u32..8, extra in 0u32..5) {
            let breaker = breaker(threshold, 60, 1);
            tokio_test::block_on(async {
                for _ in 0..threshold {
                    let _ = fail(&breaker).await;
                }
                prop_assert_eq!(breaker.state(), CircuitState::Open);
                for _ in 0..=extra {
                    match succeed(&breaker).await {
                        Err(CircuitBreakerError::Open(open)) => {
                            prop_assert_eq!(open.state, CircuitState::Open)
                        }
                        _ => prop_assert!(false, "call admitted while open"),
                    }
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
