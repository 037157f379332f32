//! Token-bucket rate limiting
//!
//! Allows bursts of calls up to a capacity, then refills tokens at a fixed
//! rate. Refill is computed lazily from elapsed wall-clock time at
//! consumption time; there is no background timer. When the bucket runs dry,
//! [`TokenBucket::acquire`] suspends the caller until the next refill rather
//! than failing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::circuit_breaker::{ConfigError, ConfigResult};
use super::clock::{Clock, SystemClock};

/// Configuration for token bucket rate limiter
#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    /// Maximum number of tokens the bucket can hold
    pub capacity: u64,
    /// Number of tokens to refill per interval
    pub refill_amount: u64,
    /// Time interval for token refill
    pub refill_interval: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self { capacity: 60, refill_amount: 1, refill_interval: Duration::from_secs(1) }
    }
}

impl TokenBucketConfig {
    /// Create a new configuration builder
    pub fn builder() -> TokenBucketConfigBuilder {
        TokenBucketConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid {
                message: "capacity must be greater than 0".to_string(),
            });
        }
        if self.refill_amount == 0 {
            return Err(ConfigError::Invalid {
                message: "refill_amount must be greater than 0".to_string(),
            });
        }
        if self.refill_interval.is_zero() {
            return Err(ConfigError::Invalid {
                message: "refill_interval must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for TokenBucketConfig
#[derive(Debug)]
pub struct TokenBucketConfigBuilder {
    config: TokenBucketConfig,
}

impl Default for TokenBucketConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBucketConfigBuilder {
    pub fn new() -> Self {
        Self { config: TokenBucketConfig::default() }
    }

    pub fn capacity(mut self, capacity: u64) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn refill_amount(mut self, amount: u64) -> Self {
        self.config.refill_amount = amount;
        self
    }

    pub fn refill_interval(mut self, interval: Duration) -> Self {
        self.config.refill_interval = interval;
        self
    }

    pub fn build(self) -> ConfigResult<TokenBucketConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Token bucket rate limiter
///
/// Cloning shares the underlying bucket. `try_acquire` never blocks;
/// `acquire` cooperatively waits for a refill.
pub struct TokenBucket<C: Clock = SystemClock> {
    config: TokenBucketConfig,
    tokens: Arc<AtomicU64>,
    last_refill: Arc<RwLock<Instant>>,
    clock: Arc<C>,
}

impl TokenBucket<SystemClock> {
    /// Create a new token bucket with the system clock
    pub fn new(config: TokenBucketConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Create a new token bucket with a custom clock
    pub fn with_clock(config: TokenBucketConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            tokens: Arc::new(AtomicU64::new(config.capacity)),
            last_refill: Arc::new(RwLock::new(clock.now())),
            clock: Arc::new(clock),
            config,
        })
    }

    /// Refill tokens based on elapsed time
    fn refill(&self) {
        let now = self.clock.now();

        let last_refill = match self.last_refill.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("token bucket last_refill lock poisoned");
                *poisoned.into_inner()
            }
        };

        let elapsed = now.duration_since(last_refill);
        let refills = elapsed.as_millis() / self.config.refill_interval.as_millis().max(1);

        if refills > 0 {
            let tokens_to_add = (refills as u64).saturating_mul(self.config.refill_amount);
            let current = self.tokens.load(Ordering::Acquire);
            let new_tokens = current.saturating_add(tokens_to_add).min(self.config.capacity);

            self.tokens.store(new_tokens, Ordering::Release);

            if let Ok(mut guard) = self.last_refill.write() {
                *guard = now;
            }

            debug!(added = tokens_to_add, available = new_tokens, "token bucket refilled");
        }
    }

    /// Try to acquire the specified number of tokens without waiting
    ///
    /// Returns `true` if tokens were acquired, `false` if not enough tokens
    /// are available.
    pub fn try_acquire(&self, tokens: u64) -> bool {
        self.refill();

        let mut current = self.tokens.load(Ordering::Acquire);

        loop {
            if current < tokens {
                debug!(available = current, requested = tokens, "token bucket exhausted");
                return false;
            }

            let new_value = current - tokens;
            match self.tokens.compare_exchange_weak(
                current,
                new_value,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => {
                    current = actual;
                }
            }
        }
    }

    /// Acquire tokens, suspending until a refill makes enough available
    ///
    /// This is a cooperative wait, not a failure path: callers are paced, not
    /// rejected. Returns `true` when the caller had to wait at least once.
    pub async fn acquire(&self, tokens: u64) -> bool {
        let mut waited = false;

        loop {
            if self.try_acquire(tokens) {
                return waited;
            }

            waited = true;
            let wait = self.time_until_refill().max(Duration::from_millis(1));
            debug!(?wait, "token bucket dry, waiting for refill");
            tokio::time::sleep(wait).await;
        }
    }

    /// Time remaining until the next scheduled refill
    pub fn time_until_refill(&self) -> Duration {
        let last_refill = match self.last_refill.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        let elapsed = self.clock.now().duration_since(last_refill);
        self.config.refill_interval.saturating_sub(elapsed)
    }

    /// Get the current number of available tokens
    pub fn available_tokens(&self) -> u64 {
        self.refill();
        self.tokens.load(Ordering::Acquire)
    }

    /// Reset the limiter to full capacity
    pub fn reset(&self) {
        self.tokens.store(self.config.capacity, Ordering::Release);
        if let Ok(mut guard) = self.last_refill.write() {
            *guard = self.clock.now();
        }
    }
}

impl<C: Clock> Clone for TokenBucket<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            tokens: Arc::clone(&self.tokens),
            last_refill: Arc::clone(&self.last_refill),
            clock: Arc::clone(&self.clock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::clock::MockClock;
    use super::*;

    fn config(capacity: u64, refill_amount: u64, interval: Duration) -> TokenBucketConfig {
        TokenBucketConfig { capacity, refill_amount, refill_interval: interval }
    }

    #[test]
    fn basic_acquire_and_exhaustion() {
        let bucket = TokenBucket::new(config(10, 5, Duration::from_secs(1))).unwrap();

        assert!(bucket.try_acquire(5));
        assert_eq!(bucket.available_tokens(), 5);

        assert!(bucket.try_acquire(5));
        assert_eq!(bucket.available_tokens(), 0);

        assert!(!bucket.try_acquire(1));
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let clock = MockClock::new();
        let bucket =
            TokenBucket::with_clock(config(10, 5, Duration::from_millis(100)), clock.clone())
                .unwrap();

        assert!(bucket.try_acquire(10));
        assert_eq!(bucket.available_tokens(), 0);

        clock.advance_millis(100);
        assert_eq!(bucket.available_tokens(), 5);

        // A long idle period must never exceed capacity
        clock.advance_millis(10_000);
        assert_eq!(bucket.available_tokens(), 10);
    }

    #[test]
    fn partial_interval_does_not_refill() {
        let clock = MockClock::new();
        let bucket =
            TokenBucket::with_clock(config(5, 1, Duration::from_millis(100)), clock.clone())
                .unwrap();

        assert!(bucket.try_acquire(5));
        clock.advance_millis(99);
        assert_eq!(bucket.available_tokens(), 0);

        clock.advance_millis(1);
        assert_eq!(bucket.available_tokens(), 1);
    }

    #[test]
    fn config_validation() {
        assert!(TokenBucketConfig::builder().capacity(0).build().is_err());
        assert!(TokenBucketConfig::builder().refill_amount(0).build().is_err());
        assert!(TokenBucketConfig::builder().refill_interval(Duration::ZERO).build().is_err());
    }

    #[test]
    fn reset_restores_capacity() {
        let bucket = TokenBucket::new(config(4, 1, Duration::from_secs(1))).unwrap();
        assert!(bucket.try_acquire(4));
        bucket.reset();
        assert_eq!(bucket.available_tokens(), 4);
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let bucket = TokenBucket::new(config(1, 1, Duration::from_millis(20))).unwrap();

        assert!(!bucket.acquire(1).await, "First token should be free");

        let start = Instant::now();
        let waited = bucket.acquire(1).await;
        assert!(waited, "Second token should require a wait");
        assert!(
            start.elapsed() >= Duration::from_millis(10),
            "Wait should span at least part of the refill interval"
        );
    }

    #[tokio::test]
    async fn concurrent_acquire_is_consistent() {
        let bucket =
            Arc::new(TokenBucket::new(config(100, 10, Duration::from_secs(10))).unwrap());

        let mut handles = vec![];
        for _ in 0..10 {
            let bucket = Arc::clone(&bucket);
            handles.push(tokio::spawn(async move {
                let mut acquired = 0u64;
                for _ in 0..10 {
                    if bucket.try_acquire(1) {
                        acquired += 1;
                    }
                }
                acquired
            }));
        }

        let mut total = 0u64;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(total, 100, "Exactly the initial capacity may be acquired");
        assert!(!bucket.try_acquire(1));
    }
}
