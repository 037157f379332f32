//! Generic runtime primitives shared across Palisade crates.
//!
//! The platform-specific client lives in `palisade-client`; this crate holds
//! the reusable pieces with no knowledge of any particular upstream service:
//! circuit breaking, token-bucket rate limiting, and backoff calculation,
//! all testable against a mock clock.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod resilience;

// Re-export commonly used types for convenience
// ------------------------
pub use resilience::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
    Clock, ConfigError, Jitter, MockClock, RetryConfig, SystemClock, TokenBucket,
    TokenBucketConfig,
};
