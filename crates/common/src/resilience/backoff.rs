//! Backoff delay calculation with jitter
//!
//! Delays grow monotonically with the attempt index up to a cap; jitter is
//! additive and strictly positive so concurrent retry loops never line up on
//! the exact same schedule.

use std::time::Duration;

use rand::Rng;

use super::circuit_breaker::{ConfigError, ConfigResult};

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Exponential backoff: min(initial * base^attempt, cap)
    Exponential { initial: Duration, base: f64, cap: Duration },
}

impl BackoffStrategy {
    /// Calculate the base delay for the given attempt (0-based), before
    /// jitter
    ///
    /// Monotonically non-decreasing in the attempt index up to the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { initial, base, cap } => {
                let millis = initial.as_millis() as f64 * base.powi(attempt as i32);
                let capped = millis.min(cap.as_millis() as f64) as u64;
                Duration::from_millis(capped)
            }
        }
    }
}

/// Jitter added on top of the calculated backoff delay
#[derive(Debug, Clone, PartialEq)]
pub enum Jitter {
    /// No jitter
    None,
    /// Add a strictly positive random duration in (0, max]
    Additive { max: Duration },
}

impl Jitter {
    /// Apply jitter to the calculated delay
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Additive { max } => {
                let max_ms = max.as_millis().max(1) as u64;
                let jitter_ms = rand::thread_rng().gen_range(1..=max_ms);
                delay + Duration::from_millis(jitter_ms)
            }
        }
    }
}

/// Configuration for a bounded retry sequence
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (initial try included)
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays between attempts
    pub backoff: BackoffStrategy,
    /// Jitter applied to every delay
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(500),
                base: 2.0,
                cap: Duration::from_secs(30),
            },
            jitter: Jitter::Additive { max: Duration::from_millis(250) },
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "max_attempts must be greater than 0".to_string(),
            });
        }

        if let BackoffStrategy::Exponential { base, .. } = &self.backoff {
            if *base <= 1.0 {
                return Err(ConfigError::Invalid {
                    message: "exponential base must be greater than 1".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Calculate the jittered delay before the next attempt (0-based index)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.backoff.delay_for(attempt))
    }
}

/// Builder for RetryConfig
#[derive(Debug)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    pub fn exponential_backoff(mut self, initial: Duration, base: f64, cap: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { initial, base, cap };
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = Jitter::None;
        self
    }

    pub fn additive_jitter(mut self, max: Duration) -> Self {
        self.config.jitter = Jitter::Additive { max };
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_is_constant() {
        let strategy = BackoffStrategy::Fixed(Duration::from_millis(100));

        assert_eq!(strategy.delay_for(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(5), Duration::from_millis(100));
    }

    #[test]
    fn exponential_backoff_doubles_until_cap() {
        let strategy = BackoffStrategy::Exponential {
            initial: Duration::from_millis(100),
            base: 2.0,
            cap: Duration::from_secs(10),
        };

        assert_eq!(strategy.delay_for(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for(2), Duration::from_millis(400));
        assert_eq!(strategy.delay_for(3), Duration::from_millis(800));
        assert_eq!(strategy.delay_for(20), Duration::from_secs(10));
    }

    #[test]
    fn exponential_backoff_is_monotonic() {
        let strategy = BackoffStrategy::Exponential {
            initial: Duration::from_millis(50),
            base: 2.0,
            cap: Duration::from_secs(5),
        };

        let mut last = Duration::ZERO;
        for attempt in 0..16 {
            let delay = strategy.delay_for(attempt);
            assert!(delay >= last, "Delay must be non-decreasing in the attempt index");
            last = delay;
        }
    }

    #[test]
    fn additive_jitter_is_strictly_positive() {
        let jitter = Jitter::Additive { max: Duration::from_millis(100) };
        let base = Duration::from_millis(200);

        for _ in 0..50 {
            let jittered = jitter.apply(base);
            assert!(jittered > base, "Jitter component must be strictly positive");
            assert!(jittered <= base + Duration::from_millis(100));
        }
    }

    #[test]
    fn no_jitter_passes_through() {
        let delay = Duration::from_millis(100);
        assert_eq!(Jitter::None.apply(delay), delay);
    }

    #[test]
    fn retry_config_defaults_are_valid() {
        let config = RetryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 4);
    }

    #[test]
    fn retry_config_validation() {
        assert!(RetryConfig::builder().max_attempts(0).build().is_err());
        assert!(RetryConfig::builder()
            .exponential_backoff(Duration::from_millis(100), 1.0, Duration::from_secs(1))
            .build()
            .is_err());
    }

    #[test]
    fn builder_sets_fields() {
        let config = RetryConfig::builder()
            .max_attempts(6)
            .fixed_backoff(Duration::from_millis(10))
            .no_jitter()
            .build()
            .unwrap();

        assert_eq!(config.max_attempts, 6);
        assert_eq!(config.backoff, BackoffStrategy::Fixed(Duration::from_millis(10)));
        assert_eq!(config.jitter, Jitter::None);
        assert_eq!(config.delay_for(3), Duration::from_millis(10));
    }
}
