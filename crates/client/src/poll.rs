//! State-verification polling
//!
//! Platform mutations propagate with a delay, so post-conditions are
//! confirmed by re-querying the observable state until it matches. Budget
//! exhaustion is a reportable outcome, not an error: callers decide whether
//! an unconfirmed state is fatal for their operation.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::errors::ClientError;

/// Repeatedly invoke `check` until `predicate` matches its result
///
/// Returns `Ok(true)` on the first match and `Ok(false)` when `max_attempts`
/// is exhausted without one. Errors raised by `check` are retried within the
/// same budget; an error on the final attempt propagates.
pub async fn poll_until<F, Fut, T, P>(
    check: F,
    predicate: P,
    max_attempts: u32,
    interval: Duration,
) -> Result<bool, ClientError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
    P: Fn(&T) -> bool,
{
    for attempt in 1..=max_attempts {
        match check().await {
            Ok(value) => {
                if predicate(&value) {
                    debug!(attempt, "verification matched");
                    return Ok(true);
                }
                debug!(attempt, "verification did not match yet");
            }
            Err(err) => {
                if attempt == max_attempts {
                    return Err(err);
                }
                debug!(attempt, error = %err, "verification check failed, retrying");
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    Ok(false)
}
