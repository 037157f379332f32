//! Resilience patterns for fault tolerance
//!
//! This module provides **generic, reusable** building blocks:
//! - **Circuit Breaker**: stops issuing calls for a cooldown period after
//!   repeated failures inside a sliding window
//! - **Token Bucket**: caps call rate while allowing bursts up to a capacity,
//!   with a cooperative async wait when the bucket runs dry
//! - **Backoff**: capped exponential delay calculation with additive jitter
//!
//! All time-dependent state is generic over [`Clock`] so tests can drive the
//! state machines deterministically with [`MockClock`].

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod rate_limiter;

pub use backoff::{BackoffStrategy, Jitter, RetryConfig, RetryConfigBuilder};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerSnapshot,
    CircuitState, ConfigError,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use rate_limiter::{TokenBucket, TokenBucketConfig, TokenBucketConfigBuilder};
