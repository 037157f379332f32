//! Resilience orchestration
//!
//! Wraps a dispatcher call with the process-wide token bucket, circuit
//! breaker, error classification, and jittered exponential backoff. One
//! orchestrator is shared by every operation of a client instance, so
//! concurrent calls pace and trip together.
//!
//! Rate-limit pushback (429) is handled outside the regular retry budget: the
//! server mandated the wait, so it is honored without burning transient-retry
//! slots, bounded by its own cap. An auth-classified failure forces one
//! anti-forgery refresh and re-issues the whole retry sequence once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use palisade_common::resilience::{
    CircuitBreaker, CircuitBreakerSnapshot, CircuitState, RetryConfig, TokenBucket,
};
use tracing::{debug, instrument, warn};

use crate::config::ClientConfig;
use crate::csrf::CsrfTokenManager;
use crate::errors::{ClientError, ErrorKind};
use crate::metrics::ClientMetrics;
use crate::session::Session;

/// Orchestrates one fallible operation through the shared resilience stack
pub struct ResilienceOrchestrator {
    breaker: CircuitBreaker,
    limiter: TokenBucket,
    retry: RetryConfig,
    rate_limit_fallback_wait: Duration,
    csrf: CsrfTokenManager,
    metrics: Arc<ClientMetrics>,
}

impl ResilienceOrchestrator {
    pub(crate) fn new(
        config: &ClientConfig,
        csrf: CsrfTokenManager,
        metrics: Arc<ClientMetrics>,
    ) -> Result<Self, ClientError> {
        let breaker = CircuitBreaker::new(config.circuit_breaker.clone())
            .map_err(|e| ClientError::Config(format!("circuit breaker: {e}")))?;
        let limiter = TokenBucket::new(config.rate_limit.clone())
            .map_err(|e| ClientError::Config(format!("rate limiter: {e}")))?;

        Ok(Self {
            breaker,
            limiter,
            retry: config.retry.clone(),
            rate_limit_fallback_wait: config.rate_limit_fallback_wait,
            csrf,
            metrics,
        })
    }

    /// Execute an operation with no session-bound auth recovery
    pub async fn execute<T, F, Fut>(&self, name: &str, op: F) -> Result<T, ClientError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.execute_with_session(name, None, op).await
    }

    /// Execute an operation, recovering once from a stale-credential failure
    ///
    /// Before every attempt one token is consumed from the bucket (a
    /// cooperative wait, not a failure) and the circuit breaker is consulted
    /// (an open circuit fails immediately with no network attempt).
    #[instrument(skip(self, session, op), fields(operation = %name))]
    pub async fn execute_with_session<T, F, Fut>(
        &self,
        name: &str,
        session: Option<&Session>,
        op: F,
    ) -> Result<T, ClientError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt: u32 = 0;
        let mut rate_limit_hits: u32 = 0;
        let mut auth_recovered = false;
        // Server-mandated waits get their own bound instead of consuming the
        // transient-retry budget
        let max_rate_limit_hits = self.retry.max_attempts.saturating_mul(2);

        loop {
            if self.limiter.acquire(1).await {
                self.metrics.record_rate_limit_wait();
            }

            if !self.breaker.acquire() {
                let retry_in = self.breaker.retry_in().unwrap_or_default();
                warn!(operation = name, ?retry_in, "circuit open, rejecting call");
                return Err(ClientError::CircuitOpen { retry_in });
            }

            self.metrics.record_request();

            let err = match op().await {
                Ok(value) => {
                    self.breaker.record_success();
                    if attempt > 0 {
                        debug!(operation = name, attempt, "operation recovered after retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let kind = err.kind();
            self.metrics.record_failure();

            // Only service-health failures count toward the breaker window; a
            // 4xx/auth/429 response proves the service answered, which also
            // resolves a half-open probe as healthy.
            if service_failure(kind) && !err.is_fatal() {
                if self.breaker.record_failure() {
                    self.metrics.record_circuit_trip();
                }
            } else {
                self.breaker.record_success();
            }

            if err.is_fatal() {
                return Err(err);
            }
            if !kind.is_retryable() {
                debug!(operation = name, error = %err, "non-retryable failure");
                return Err(err);
            }

            match kind {
                ErrorKind::Auth => {
                    let Some(session) = session else {
                        return Err(err);
                    };
                    if auth_recovered {
                        warn!(operation = name, "auth failure persisted after token refresh");
                        return Err(err);
                    }
                    auth_recovered = true;
                    warn!(operation = name, "auth-classified failure, forcing token refresh");
                    self.csrf.token(session, true).await?;
                    // Re-issue the whole retry sequence with the new token
                    attempt = 0;
                    continue;
                }
                ErrorKind::RateLimit => {
                    if rate_limit_hits >= max_rate_limit_hits {
                        warn!(operation = name, "rate-limit wait budget exhausted");
                        return Err(err);
                    }
                    rate_limit_hits += 1;
                    let wait = match &err {
                        ClientError::RateLimited { retry_after: Some(after) } => *after,
                        _ => self.rate_limit_fallback_wait,
                    };
                    self.metrics.record_rate_limit_wait();
                    warn!(operation = name, ?wait, "rate limited, honoring mandated wait");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                _ => {
                    if attempt + 1 >= self.retry.max_attempts {
                        warn!(
                            operation = name,
                            attempts = attempt + 1,
                            error = %err,
                            "retry budget exhausted"
                        );
                        return Err(err);
                    }
                    let delay = self.retry.delay_for(attempt);
                    debug!(operation = name, attempt, ?delay, error = %err, "retrying after backoff");
                    self.metrics.record_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Current circuit breaker state
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Point-in-time circuit breaker snapshot
    pub fn circuit_snapshot(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Tokens currently available in the rate limiter
    pub fn available_tokens(&self) -> u64 {
        self.limiter.available_tokens()
    }
}

fn service_failure(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Server | ErrorKind::Unknown
    )
}
