//! Circuit breaker for protecting known-unhealthy resources.
//!
//! A breaker wraps calls against one resource and stops invoking it after a
//! run of failures, rejecting further calls until a recovery window has
//! passed. It then admits a single probe call: success seals recovery and
//! closes the circuit, failure reopens it for another window.
//!
//! One breaker instance is the source of truth for one resource's health.
//! Instances are cheap to clone and clones share state, so the same logical
//! breaker can be handed to every call site that touches the resource.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::error::{ConfigError, ConfigResult};

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Trait for time operations to enable deterministic testing
///
/// Lets the breaker run on real monotonic time in production and on
/// controlled mock time in tests, so recovery-window behavior can be tested
/// without actual delays.
pub trait Clock: Send + Sync + 'static {
    /// Get the current instant (monotonic time)
    fn now(&self) -> Instant;
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Implement Clock for Arc<T> where T: Clock for convenient cloning
impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Mock clock for deterministic testing
///
/// Allows tests to control time progression without actual delays.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Advance the mock clock by milliseconds (convenience method)
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO);
        self.start + elapsed
    }
}

//==============================================================================
// Errors and States
//==============================================================================

/// Errors produced by circuit-breaker-protected calls
///
/// Rejection by an open circuit is a distinct variant from an operation
/// failure so callers can tell "the resource is known-bad" apart from "this
/// specific call failed".
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open, rejecting calls without invoking the
    /// operation
    #[error("circuit breaker is open, rejecting calls")]
    Open,

    /// The underlying operation failed
    #[error("operation failed")]
    Operation {
        #[source]
        source: E,
    },
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing a single probe to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait while open before admitting a recovery probe
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(30) }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    /// Set a custom clock and build a breaker directly (useful for testing)
    pub fn clock<C: Clock>(self, clock: C) -> CircuitBreakerBuilderWithClock<C> {
        CircuitBreakerBuilderWithClock { config: self.config, clock }
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder with a custom clock that builds a CircuitBreaker directly
pub struct CircuitBreakerBuilderWithClock<C: Clock> {
    config: CircuitBreakerConfig,
    clock: C,
}

impl<C: Clock> CircuitBreakerBuilderWithClock<C> {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(self.config, self.clock)
    }
}

//==============================================================================
// Circuit Breaker
//==============================================================================

/// Point-in-time view of a breaker for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Stateful guard that stops invoking a failing resource.
///
/// State machine: CLOSED counts consecutive failures and opens at the
/// configured threshold. OPEN rejects every call until `reset_timeout` has
/// elapsed since the last failure, then admits exactly one probe and moves
/// to HALF_OPEN. A successful probe closes the circuit and clears the
/// failure count; a failed probe reopens it and restarts the window.
///
/// Admission and every transition run under one interior lock, so two calls
/// racing at the reset-timeout boundary cannot both become probes.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    total_calls: Arc<AtomicU64>,
    rejected_calls: Arc<AtomicU64>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            total_calls: Arc::clone(&self.total_calls),
            rejected_calls: Arc::clone(&self.rejected_calls),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker with the given configuration using the
    /// system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a circuit breaker with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default()).expect("default config should be valid")
    }

    /// Create a circuit breaker using the builder pattern
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Permission to run one protected call, handed out by admission.
///
/// A probe permit that is dropped without being settled (the caller
/// abandoned the future mid-flight) releases the probe slot so the breaker
/// cannot wedge in HALF_OPEN.
struct CallPermit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    probe: bool,
    settled: bool,
}

impl<C: Clock> CallPermit<'_, C> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl<C: Clock> Drop for CallPermit<'_, C> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.abandon_probe();
        }
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                probe_in_flight: false,
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(clock),
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                poisoned.into_inner()
            }
        }
    }

    /// Admission check: decides under the lock whether this call may run,
    /// transitioning OPEN to HALF_OPEN when the recovery window has passed.
    fn try_acquire(&self) -> Option<CallPermit<'_, C>> {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::Closed => {
                Some(CallPermit { breaker: self, probe: false, settled: false })
            }
            CircuitState::Open => {
                let window_elapsed = inner
                    .last_failure_at
                    .map(|at| self.clock.now().saturating_duration_since(at))
                    .is_some_and(|elapsed| elapsed >= self.config.reset_timeout);

                if window_elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!("circuit breaker half-open, admitting recovery probe");
                    Some(CallPermit { breaker: self, probe: true, settled: false })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    debug!("circuit breaker admitting recovery probe");
                    Some(CallPermit { breaker: self, probe: true, settled: false })
                }
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock_inner();
        if probe {
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.probe_in_flight = false;
            inner.last_failure_at = None;
            info!("circuit breaker closed after successful probe");
        } else if inner.state == CircuitState::Closed {
            inner.failure_count = 0;
        }
    }

    fn on_failure(&self, probe: bool) {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        inner.last_failure_at = Some(now);

        if probe {
            inner.state = CircuitState::Open;
            inner.probe_in_flight = false;
            warn!("circuit breaker reopened after failed probe");
            return;
        }

        if inner.state == CircuitState::Closed {
            inner.failure_count += 1;
            if inner.failure_count >= self.config.failure_threshold {
                inner.state = CircuitState::Open;
                warn!(failures = inner.failure_count, "circuit breaker opened");
            }
        }
    }

    fn abandon_probe(&self) {
        let mut inner = self.lock_inner();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
            debug!("circuit breaker probe abandoned before completion");
        }
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Rejected calls return [`CircuitBreakerError::Open`] without invoking
    /// the operation. Dropping the returned future while the operation is in
    /// flight releases any probe slot it holds.
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(permit) = self.try_acquire() else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!("circuit breaker rejecting call");
            return Err(CircuitBreakerError::Open);
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match operation().await {
            Ok(result) => {
                permit.success();
                debug!("circuit breaker: operation succeeded");
                Ok(result)
            }
            Err(error) => {
                permit.failure();
                warn!(error = %error, "circuit breaker: operation failed");
                Err(CircuitBreakerError::Operation { source: error })
            }
        }
    }

    /// Execute a synchronous operation with circuit breaker protection
    ///
    /// Synchronous alternative to [`CircuitBreaker::execute`] for non-async
    /// contexts.
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(permit) = self.try_acquire() else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!("circuit breaker rejecting call");
            return Err(CircuitBreakerError::Open);
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match operation() {
            Ok(result) => {
                permit.success();
                debug!("circuit breaker: operation succeeded");
                Ok(result)
            }
            Err(error) => {
                permit.failure();
                warn!(error = %error, "circuit breaker: operation failed");
                Err(CircuitBreakerError::Operation { source: error })
            }
        }
    }

    /// Get the current state of the circuit breaker
    ///
    /// Pure read with no side effects: an elapsed recovery window is only
    /// acted on at call admission, never here.
    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    /// Number of consecutive failures recorded while closed
    pub fn failure_count(&self) -> u32 {
        self.lock_inner().failure_count
    }

    /// Get a point-in-time snapshot for monitoring
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock_inner();
        CircuitBreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker back to closed with a clean failure count
    ///
    /// Operator escape hatch, not part of the automatic state machine.
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.probe_in_flight = false;
        inner.last_failure_at = None;
        info!("circuit breaker manually reset to closed");
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the circuit breaker
    //!
    //! Tests cover configuration validation, state transitions through the
    //! full CLOSED/OPEN/HALF_OPEN cycle, single-probe admission, recovery
    //! window behavior with a mock clock, manual reset, and concurrent
    //! access.

    use std::io;
    use std::sync::atomic::AtomicU32;

    use super::*;

    fn failing() -> Result<(), io::Error> {
        Err(io::Error::other("test failure"))
    }

    /// Validates `CircuitState` display formatting.
    ///
    /// Assertions:
    /// - Confirms `CircuitState::Closed.to_string()` equals `"CLOSED"`.
    /// - Confirms `CircuitState::Open.to_string()` equals `"OPEN"`.
    /// - Confirms `CircuitState::HalfOpen.to_string()` equals `"HALF_OPEN"`.
    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    /// Validates `CircuitBreakerConfig::default` values.
    ///
    /// Assertions:
    /// - Confirms `failure_threshold` equals `5`.
    /// - Confirms `reset_timeout` equals `30s`.
    #[test]
    fn test_config_default() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.reset_timeout, Duration::from_secs(30));
    }

    /// Validates config builder output and validation failure on a zero
    /// threshold.
    #[test]
    fn test_config_builder_and_validation() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .reset_timeout(Duration::from_secs(5))
            .build()
            .expect("valid config should build");
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.reset_timeout, Duration::from_secs(5));

        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
    }

    /// Validates a new breaker starts closed with a clean failure count.
    #[test]
    fn test_breaker_starts_closed() {
        let breaker = CircuitBreaker::with_defaults();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    /// Tests the circuit opens once consecutive failures reach the
    /// threshold and stays closed below it.
    #[test]
    fn test_opens_at_failure_threshold() {
        let breaker = CircuitBreaker::builder()
            .failure_threshold(3)
            .clock(SystemClock)
            .build()
            .expect("breaker should build");

        let _ = breaker.call(|| failing());
        let _ = breaker.call(|| failing());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);

        let _ = breaker.call(|| failing());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    /// Tests an open circuit rejects calls without invoking the operation,
    /// and that the rejection is distinguishable from operation failures.
    #[test]
    fn test_open_rejects_without_invoking() {
        let breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .clock(SystemClock)
            .build()
            .expect("breaker should build");

        let _ = breaker.call(|| failing());
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result = breaker.call(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>(42)
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match result {
            Err(CircuitBreakerError::Open) => {}
            other => panic!("expected Open rejection, got {other:?}"),
        }
    }

    /// Tests a success while closed resets the accumulated failure count.
    #[test]
    fn test_success_resets_failure_count_while_closed() {
        let breaker = CircuitBreaker::builder()
            .failure_threshold(5)
            .clock(SystemClock)
            .build()
            .expect("breaker should build");

        let _ = breaker.call(|| failing());
        let _ = breaker.call(|| failing());
        assert_eq!(breaker.failure_count(), 2);

        let _ = breaker.call(|| Ok::<_, io::Error>(()));
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Tests the recovery window: before the reset timeout the breaker
    /// keeps rejecting, after it the next call probes and a success closes
    /// the circuit with a clean failure count.
    #[test]
    fn test_recovery_window_with_mock_clock() {
        let clock = MockClock::new();
        let breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .reset_timeout(Duration::from_secs(60))
            .clock(clock.clone())
            .build()
            .expect("breaker should build");

        let _ = breaker.call(|| failing());
        assert_eq!(breaker.state(), CircuitState::Open);

        // Window not yet elapsed: still rejecting.
        clock.advance(Duration::from_secs(30));
        let early = breaker.call(|| Ok::<_, io::Error>(()));
        assert!(matches!(early, Err(CircuitBreakerError::Open)));
        assert_eq!(breaker.state(), CircuitState::Open);

        // Window elapsed: next call runs as the probe, observing HALF_OPEN.
        clock.advance(Duration::from_secs(31));
        let result = breaker.call(|| {
            assert_eq!(breaker.state(), CircuitState::HalfOpen);
            Ok::<_, io::Error>("recovered")
        });

        assert_eq!(result.expect("probe should succeed"), "recovered");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    /// Tests a failed probe reopens the circuit and restarts the recovery
    /// window from the probe failure.
    #[test]
    fn test_failed_probe_reopens_and_restarts_window() {
        let clock = MockClock::new();
        let breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .reset_timeout(Duration::from_secs(10))
            .clock(clock.clone())
            .build()
            .expect("breaker should build");

        let _ = breaker.call(|| failing());
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(10));
        let probe = breaker.call(|| failing());
        assert!(matches!(probe, Err(CircuitBreakerError::Operation { .. })));
        assert_eq!(breaker.state(), CircuitState::Open);

        // The window restarted at the probe failure, so halfway through the
        // breaker still rejects.
        clock.advance(Duration::from_secs(5));
        assert!(matches!(
            breaker.call(|| Ok::<_, io::Error>(())),
            Err(CircuitBreakerError::Open)
        ));

        clock.advance(Duration::from_secs(5));
        assert!(breaker.call(|| Ok::<_, io::Error>(())).is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Tests `state()` is a pure read: an elapsed recovery window does not
    /// transition the breaker until a call is admitted.
    #[test]
    fn test_state_read_has_no_side_effects() {
        let clock = MockClock::new();
        let breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .reset_timeout(Duration::from_secs(1))
            .clock(clock.clone())
            .build()
            .expect("breaker should build");

        let _ = breaker.call(|| failing());
        clock.advance(Duration::from_secs(5));

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(breaker.call(|| Ok::<_, io::Error>(())).is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Tests `reset()` forces the breaker closed from any state.
    #[test]
    fn test_reset_forces_closed() {
        let breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .clock(SystemClock)
            .build()
            .expect("breaker should build");

        let _ = breaker.call(|| failing());
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.call(|| Ok::<_, io::Error>(())).is_ok());
    }

    /// Validates async `execute` success, failure, and open rejection.
    #[tokio::test]
    async fn test_execute_async_paths() {
        let breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .clock(SystemClock)
            .build()
            .expect("breaker should build");

        let ok = breaker.execute(|| async { Ok::<_, io::Error>(7) }).await;
        assert_eq!(ok.expect("operation should succeed"), 7);

        let err = breaker.execute(|| async { failing() }).await;
        assert!(matches!(err, Err(CircuitBreakerError::Operation { .. })));

        let rejected = breaker.execute(|| async { Ok::<_, io::Error>(7) }).await;
        assert!(matches!(rejected, Err(CircuitBreakerError::Open)));
    }

    /// Tests at most one probe is admitted while half-open: a second call
    /// arriving while the probe is in flight is rejected.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_half_open_admits_single_probe() {
        let clock = MockClock::new();
        let breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .reset_timeout(Duration::from_millis(50))
            .clock(clock.clone())
            .build()
            .expect("breaker should build");

        let _ = breaker.call(|| failing());
        clock.advance_millis(60);

        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let probe_breaker = breaker.clone();
        let probe = tokio::spawn(async move {
            probe_breaker
                .execute(|| async move {
                    gate.await.expect("probe gate should not be dropped");
                    Ok::<_, io::Error>("probe ok")
                })
                .await
        });

        // Wait for the probe to be admitted.
        while breaker.state() != CircuitState::HalfOpen {
            tokio::task::yield_now().await;
        }

        // A second caller racing the in-flight probe is rejected.
        let second = breaker.execute(|| async { Ok::<_, io::Error>("second") }).await;
        assert!(matches!(second, Err(CircuitBreakerError::Open)));

        release.send(()).expect("probe should still be waiting");
        let outcome = probe.await.expect("probe task should complete");
        assert_eq!(outcome.expect("probe should succeed"), "probe ok");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Tests an abandoned probe releases the probe slot so a later call can
    /// probe instead of the breaker wedging half-open.
    #[tokio::test]
    async fn test_abandoned_probe_releases_slot() {
        let clock = MockClock::new();
        let breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .reset_timeout(Duration::from_millis(10))
            .clock(clock.clone())
            .build()
            .expect("breaker should build");

        let _ = breaker.call(|| failing());
        clock.advance_millis(20);

        // Admit a probe that never completes, then drop it via timeout.
        let hung = tokio::time::timeout(
            Duration::from_millis(20),
            breaker.execute(|| std::future::pending::<Result<(), io::Error>>()),
        )
        .await;
        assert!(hung.is_err(), "hung probe should time out");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // The slot was released, so the next call becomes the probe.
        let retry = breaker.execute(|| async { Ok::<_, io::Error>(()) }).await;
        assert!(retry.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Tests clones share state so all call sites see one breaker per
    /// resource.
    #[test]
    fn test_clone_shares_state() {
        let breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .clock(SystemClock)
            .build()
            .expect("breaker should build");
        let other = breaker.clone();

        let _ = breaker.call(|| failing());
        assert_eq!(other.state(), CircuitState::Open);

        other.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Validates the monitoring snapshot counts admitted and rejected
    /// calls.
    #[test]
    fn test_snapshot_counters() {
        let breaker = CircuitBreaker::builder()
            .failure_threshold(2)
            .clock(SystemClock)
            .build()
            .expect("breaker should build");

        let _ = breaker.call(|| Ok::<_, io::Error>(()));
        let _ = breaker.call(|| failing());
        let _ = breaker.call(|| failing());
        // Open now; this one is rejected.
        let _ = breaker.call(|| Ok::<_, io::Error>(()));

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 2);
        assert_eq!(snapshot.total_calls, 3);
        assert_eq!(snapshot.rejected_calls, 1);
    }

    /// Tests the breaker is safe under concurrent async access and tracks
    /// every admitted call.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_access() {
        let breaker = Arc::new(
            CircuitBreaker::builder()
                .failure_threshold(100)
                .clock(SystemClock)
                .build()
                .expect("breaker should build"),
        );
        let mut handles = vec![];

        for i in 0..20 {
            let breaker = Arc::clone(&breaker);
            handles.push(tokio::spawn(async move {
                if i % 3 == 0 {
                    breaker.execute(|| async { failing() }).await.is_ok()
                } else {
                    breaker.execute(|| async { Ok::<_, io::Error>(()) }).await.is_ok()
                }
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.expect("task should complete") {
                successes += 1;
            }
        }

        assert_eq!(successes, 13);
        assert_eq!(breaker.snapshot().total_calls, 20);
    }

    /// Tests the mock clock advances deterministically.
    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));

        clock.advance_millis(500);
        assert_eq!(clock.elapsed(), Duration::from_millis(5500));
    }
}
