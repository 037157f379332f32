//! Circuit breaker for protecting an upstream service.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: upstream assumed unhealthy, calls fail fast until a cooldown passes
//! - Half-Open: cooldown elapsed, exactly one probe call is admitted
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures within the sliding window reach the threshold
//! Open → Half-Open: after the cooldown deadline
//! Half-Open → Closed: the probe call succeeds (window cleared)
//! Half-Open → Open: the probe call fails (deadline re-armed)
//! ```
//!
//! Failures are tracked as timestamps in a sliding window rather than a bare
//! counter, so old failures age out instead of accumulating forever.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};

/// Simple configuration error for validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Result type for configuration validation
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing calls
    Closed,
    /// Circuit is open, rejecting calls
    Open,
    /// Circuit is half-open, allowing a single probe call
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

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures within `failure_window` before opening the circuit
    pub failure_threshold: u64,
    /// Sliding window over which failures are counted
    pub failure_window: Duration,
    /// Time to wait before transitioning from open to half-open
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
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
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }

        if self.failure_window.is_zero() {
            return Err(ConfigError::Invalid {
                message: "failure_window must be greater than zero".to_string(),
            });
        }

        if self.cooldown.is_zero() {
            return Err(ConfigError::Invalid {
                message: "cooldown must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn failure_window(mut self, window: Duration) -> Self {
        self.config.failure_window = window;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of circuit breaker state for observability
#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    /// Failures currently inside the sliding window
    pub failure_count: u64,
    /// Total number of Closed/HalfOpen → Open transitions
    pub opened_total: u64,
    /// Remaining cooldown if the circuit is open
    pub reset_in: Option<Duration>,
}

/// Sliding-window circuit breaker
///
/// Cloning shares the underlying state; all methods are safe under concurrent
/// access. The caller drives the breaker with [`acquire`](Self::acquire) /
/// [`record_success`](Self::record_success) /
/// [`record_failure`](Self::record_failure).
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    failures: Arc<RwLock<VecDeque<Instant>>>,
    reset_at: Arc<RwLock<Option<Instant>>>,
    probe_in_flight: Arc<AtomicBool>,
    opened_total: Arc<AtomicU64>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            failures: Arc::clone(&self.failures),
            reset_at: Arc::clone(&self.reset_at),
            probe_in_flight: Arc::clone(&self.probe_in_flight),
            opened_total: Arc::clone(&self.opened_total),
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
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failures: Arc::new(RwLock::new(VecDeque::new())),
            reset_at: Arc::new(RwLock::new(None)),
            probe_in_flight: Arc::new(AtomicBool::new(false)),
            opened_total: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(clock),
        })
    }

    /// Ask the breaker for permission to issue one call
    ///
    /// Returns `false` while the circuit is open and the cooldown has not
    /// elapsed. Once it elapses, the state moves to half-open and exactly one
    /// caller wins the probe slot; others are rejected until the probe
    /// resolves via `record_success` / `record_failure`.
    pub fn acquire(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let now = self.clock.now();
                let deadline = match self.reset_at.read() {
                    Ok(guard) => *guard,
                    Err(poisoned) => {
                        warn!("circuit breaker reset_at lock poisoned");
                        *poisoned.into_inner()
                    }
                };

                match deadline {
                    Some(at) if now >= at => {
                        self.set_state(CircuitState::HalfOpen);
                        self.probe_in_flight.store(false, Ordering::Release);
                        debug!("circuit breaker half-open, admitting probe");
                        self.claim_probe()
                    }
                    _ => false,
                }
            }
            CircuitState::HalfOpen => self.claim_probe(),
        }
    }

    fn claim_probe(&self) -> bool {
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record a successful call
    ///
    /// A success while half-open closes the circuit and clears the failure
    /// window. Successes while closed are not tracked; old failures age out
    /// of the window on their own.
    pub fn record_success(&self) {
        if self.state() == CircuitState::HalfOpen {
            self.set_state(CircuitState::Closed);
            if let Ok(mut failures) = self.failures.write() {
                failures.clear();
            }
            if let Ok(mut reset_at) = self.reset_at.write() {
                *reset_at = None;
            }
            self.probe_in_flight.store(false, Ordering::Release);
            info!("circuit breaker closed after successful probe");
        }
    }

    /// Record a failed call
    ///
    /// Returns `true` when this failure transitioned the circuit to open.
    pub fn record_failure(&self) -> bool {
        let now = self.clock.now();

        let window_count = {
            let mut failures = match self.failures.write() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn!("circuit breaker failure window lock poisoned");
                    poisoned.into_inner()
                }
            };
            failures.push_back(now);
            let cutoff = now.checked_sub(self.config.failure_window);
            if let Some(cutoff) = cutoff {
                while failures.front().is_some_and(|t| *t < cutoff) {
                    failures.pop_front();
                }
            }
            failures.len() as u64
        };

        match self.state() {
            CircuitState::HalfOpen => {
                // Any failure during the probe re-opens immediately
                self.open(now);
                warn!("circuit breaker re-opened after failed probe");
                true
            }
            CircuitState::Closed => {
                if window_count >= self.config.failure_threshold {
                    self.open(now);
                    warn!(failures = window_count, "circuit breaker opened");
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => false,
        }
    }

    fn open(&self, now: Instant) {
        self.set_state(CircuitState::Open);
        if let Ok(mut reset_at) = self.reset_at.write() {
            *reset_at = Some(now + self.config.cooldown);
        }
        self.probe_in_flight.store(false, Ordering::Release);
        self.opened_total.fetch_add(1, Ordering::Relaxed);
    }

    fn set_state(&self, new_state: CircuitState) {
        match self.state.write() {
            Ok(mut guard) => *guard = new_state,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                *poisoned.into_inner() = new_state;
            }
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned during read");
                *poisoned.into_inner()
            }
        }
    }

    /// Time remaining until an open circuit admits a probe, if any
    pub fn retry_in(&self) -> Option<Duration> {
        let deadline = self.reset_at.read().ok().and_then(|guard| *guard)?;
        Some(deadline.saturating_duration_since(self.clock.now()))
    }

    /// Number of failures currently inside the sliding window
    pub fn failure_count(&self) -> u64 {
        let now = self.clock.now();
        let cutoff = now.checked_sub(self.config.failure_window);
        match self.failures.read() {
            Ok(guard) => match cutoff {
                Some(cutoff) => guard.iter().filter(|t| **t >= cutoff).count() as u64,
                None => guard.len() as u64,
            },
            Err(_) => 0,
        }
    }

    /// Get a point-in-time snapshot for observability
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state(),
            failure_count: self.failure_count(),
            opened_total: self.opened_total.load(Ordering::Acquire),
            reset_in: if self.state() == CircuitState::Open { self.retry_in() } else { None },
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        if let Ok(mut failures) = self.failures.write() {
            failures.clear();
        }
        if let Ok(mut reset_at) = self.reset_at.write() {
            *reset_at = None;
        }
        self.probe_in_flight.store(false, Ordering::Release);
        self.set_state(CircuitState::Closed);
        info!("circuit breaker manually reset to closed state");
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failures: Arc::new(RwLock::new(VecDeque::new())),
            reset_at: Arc::new(RwLock::new(None)),
            probe_in_flight: Arc::new(AtomicBool::new(false)),
            opened_total: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(SystemClock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::clock::MockClock;
    use super::*;

    fn breaker_with_clock(threshold: u64, clock: MockClock) -> CircuitBreaker<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .failure_window(Duration::from_secs(60))
            .cooldown(Duration::from_secs(30))
            .build()
            .unwrap();
        CircuitBreaker::with_clock(config, clock).unwrap()
    }

    #[test]
    fn state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    #[test]
    fn config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());

        let mut config = CircuitBreakerConfig::default();
        config.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = CircuitBreakerConfig::default();
        config.failure_window = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = CircuitBreakerConfig::default();
        config.cooldown = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_validation_fails_on_zero_threshold() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
    }

    #[test]
    fn closed_allows_calls() {
        let cb = CircuitBreaker::default();
        assert!(cb.acquire());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_at_threshold() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(3, clock);

        assert!(!cb.record_failure());
        assert!(!cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Closed, "Should remain closed below threshold");

        assert!(cb.record_failure(), "Hitting the threshold should report the trip");
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.acquire(), "Open circuit should reject calls");
    }

    #[test]
    fn failures_age_out_of_window() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(3, clock.clone());

        cb.record_failure();
        cb.record_failure();

        // Old failures fall out of the 60s window
        clock.advance(Duration::from_secs(61));
        assert_eq!(cb.failure_count(), 0);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed, "Aged-out failures must not count");
    }

    #[test]
    fn half_open_after_cooldown_admits_single_probe() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(1, clock.clone());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.acquire());

        clock.advance(Duration::from_secs(31));
        assert!(cb.acquire(), "First caller after cooldown wins the probe slot");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.acquire(), "Second caller must wait for the probe to resolve");
    }

    #[test]
    fn probe_success_closes_and_clears_window() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(2, clock.clone());

        cb.record_failure();
        cb.record_failure();
        clock.advance(Duration::from_secs(31));
        assert!(cb.acquire());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.acquire());
    }

    #[test]
    fn probe_failure_reopens() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(2, clock.clone());

        cb.record_failure();
        cb.record_failure();
        clock.advance(Duration::from_secs(31));
        assert!(cb.acquire());

        assert!(cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.acquire(), "Cooldown deadline must be re-armed");
    }

    #[test]
    fn retry_in_reports_remaining_cooldown() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(1, clock.clone());

        cb.record_failure();
        let remaining = cb.retry_in().unwrap();
        assert_eq!(remaining, Duration::from_secs(30));

        clock.advance(Duration::from_secs(10));
        assert_eq!(cb.retry_in().unwrap(), Duration::from_secs(20));
    }

    #[test]
    fn snapshot_reflects_state() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(1, clock);

        cb.record_failure();
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.opened_total, 1);
        assert!(snapshot.reset_in.is_some());
    }

    #[test]
    fn reset_returns_to_closed() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(1, clock);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.acquire());
    }

    #[test]
    fn clones_share_state() {
        let cb1 = CircuitBreaker::default();
        cb1.record_failure();

        let cb2 = cb1.clone();
        assert_eq!(cb2.failure_count(), 1);
        assert_eq!(cb2.state(), cb1.state());
    }

    #[tokio::test]
    async fn concurrent_failures_trip_once() {
        let cb = Arc::new(
            CircuitBreaker::new(
                CircuitBreakerConfig::builder().failure_threshold(10).build().unwrap(),
            )
            .unwrap(),
        );

        let mut handles = vec![];
        for _ in 0..10 {
            let cb = Arc::clone(&cb);
            handles.push(tokio::spawn(async move { cb.record_failure() }));
        }

        let mut trips = 0;
        for handle in handles {
            if handle.await.unwrap() {
                trips += 1;
            }
        }

        assert_eq!(trips, 1, "Exactly one failure should report the transition");
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
