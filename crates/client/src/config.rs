//! Client configuration
//!
//! All behavior is driven by an explicit [`ClientConfig`] threaded into
//! constructors; there is no ambient settings singleton. Defaults match the
//! platform's published limits and are safe to use as-is; tests swap in
//! short intervals and mock-server URLs.

use std::time::Duration;

use palisade_common::resilience::{CircuitBreakerConfig, RetryConfig, TokenBucketConfig};

use crate::errors::ClientError;
use crate::proxy::ProxyConfig;

/// Anti-forgery token lifecycle settings
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    /// Ordered probe endpoints, smallest side effect first; the first
    /// response carrying a fresh token header wins
    pub probe_urls: Vec<String>,
    /// Cache lifetime of an acquired token
    pub ttl: Duration,
    /// How long before expiry the proactive background refresh fires
    pub refresh_margin: Duration,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            probe_urls: vec![
                "https://auth.platform.example/v2/logout".to_string(),
                "https://auth.platform.example/v1/authentication-ticket".to_string(),
                "https://auth.platform.example/v2/login".to_string(),
            ],
            ttl: Duration::from_secs(300),
            refresh_margin: Duration::from_secs(30),
        }
    }
}

impl CsrfConfig {
    fn validate(&self) -> Result<(), ClientError> {
        if self.probe_urls.is_empty() {
            return Err(ClientError::Config("csrf.probe_urls must not be empty".to_string()));
        }
        if self.ttl.is_zero() {
            return Err(ClientError::Config("csrf.ttl must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Budget for state-verification polling
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Maximum number of verification attempts
    pub max_attempts: u32,
    /// Sleep between attempts
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { max_attempts: 5, interval: Duration::from_secs(1) }
    }
}

impl PollConfig {
    fn validate(&self) -> Result<(), ClientError> {
        if self.max_attempts == 0 {
            return Err(ClientError::Config(
                "poll.max_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for API requests, e.g. `https://apis.platform.example`
    pub api_base: String,
    /// User agent sent on every request
    pub user_agent: String,
    /// Global per-request timeout
    pub timeout: Duration,
    /// Cancellation bound for composite operations (e.g. kick)
    pub operation_timeout: Duration,
    /// Redirect `Location` values containing this marker signal a lost session
    pub login_redirect_marker: String,
    /// Proxy routing defaults, overridable per call
    pub proxy: ProxyConfig,
    /// Anti-forgery token lifecycle
    pub csrf: CsrfConfig,
    /// Backoff schedule for orchestrated retries
    pub retry: RetryConfig,
    /// Request pacing
    pub rate_limit: TokenBucketConfig,
    /// Failure-window circuit breaking
    pub circuit_breaker: CircuitBreakerConfig,
    /// Verification polling budget
    pub poll: PollConfig,
    /// Wait applied to a 429 that carries no `Retry-After` header
    pub rate_limit_fallback_wait: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://apis.platform.example".to_string(),
            user_agent: concat!("palisade/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(120),
            login_redirect_marker: "/login".to_string(),
            proxy: ProxyConfig::default(),
            csrf: CsrfConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: TokenBucketConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            poll: PollConfig::default(),
            rate_limit_fallback_wait: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.api_base.is_empty() {
            return Err(ClientError::Config("api_base must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ClientError::Config("timeout must be greater than zero".to_string()));
        }
        if self.operation_timeout < self.timeout {
            return Err(ClientError::Config(
                "operation_timeout must be at least the per-request timeout".to_string(),
            ));
        }
        self.csrf.validate()?;
        self.poll.validate()?;
        self.retry.validate().map_err(|e| ClientError::Config(e.to_string()))?;
        self.rate_limit.validate().map_err(|e| ClientError::Config(e.to_string()))?;
        self.circuit_breaker.validate().map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(())
    }
}
