//! Moderation endpoints and the composite kick operation
//!
//! Block/unblock/is-blocked are plain orchestrated calls. `kick` composes
//! them into block → verify-blocked → unblock → verify-unblocked with
//! compensating cleanup: once a block has succeeded, any later non-auth
//! failure triggers a bounded-retry guaranteed unblock so the target is not
//! left blocked by accident.

use std::time::Duration;

use tracing::{info, instrument, warn};

use super::host_base;
use crate::client::PlatformClient;
use crate::errors::{ClientError, ErrorKind};
use crate::http::DispatchOptions;
use crate::poll::poll_until;
use crate::session::Session;

/// Cleanup unblock retries; deliberately outside the orchestrator so an open
/// circuit cannot stop the compensation
const CLEANUP_ATTEMPTS: u32 = 3;
const CLEANUP_BACKOFF: Duration = Duration::from_millis(500);

/// Moderation operations
pub struct Moderation<'a> {
    client: &'a PlatformClient,
}

impl<'a> Moderation<'a> {
    pub(crate) fn new(client: &'a PlatformClient) -> Self {
        Self { client }
    }

    /// Block a user
    pub async fn block(&self, session: &Session, user_id: u64) -> Result<(), ClientError> {
        self.block_at(&self.client.config().api_base, session, user_id).await
    }

    /// Unblock a user
    pub async fn unblock(&self, session: &Session, user_id: u64) -> Result<(), ClientError> {
        self.unblock_at(&self.client.config().api_base, session, user_id).await
    }

    /// Check whether a user is currently blocked
    ///
    /// The endpoint returns a bare JSON boolean, not an object.
    pub async fn is_blocked(&self, session: &Session, user_id: u64) -> Result<bool, ClientError> {
        self.is_blocked_at(&self.client.config().api_base, session, user_id).await
    }

    /// Kick a user: block, verify, unblock, verify
    ///
    /// Block-verification exhausting its poll budget is logged and tolerated
    /// (the platform's own propagation delay is assumed); failing to confirm
    /// the final unblock is a correctness failure and surfaces as
    /// [`ClientError::VerificationTimeout`]. The whole operation runs under
    /// one cancellation deadline so timing out leaves no orphaned sub-call.
    #[instrument(skip(self, session), fields(user_id = user_id))]
    pub async fn kick(
        &self,
        session: &Session,
        user_id: u64,
        api_host: Option<&str>,
    ) -> Result<(), ClientError> {
        let base = match api_host {
            Some(host) => host_base(host),
            None => self.client.config().api_base.clone(),
        };

        let deadline = self.client.config().operation_timeout;
        match tokio::time::timeout(deadline, self.kick_inner(session, user_id, &base)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(deadline)),
        }
    }

    async fn kick_inner(
        &self,
        session: &Session,
        user_id: u64,
        base: &str,
    ) -> Result<(), ClientError> {
        let poll = self.client.config().poll.clone();

        // Blocking: a failure here is terminal, nothing to undo yet
        self.block_at(base, session, user_id).await?;
        info!(user_id, "block issued, verifying");

        // BlockVerifying: best-effort; exhaustion is reportable but non-fatal
        let verified = poll_until(
            || async { self.is_blocked_at(base, session, user_id).await },
            |blocked| *blocked,
            poll.max_attempts,
            poll.interval,
        )
        .await;
        match verified {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id, "block not confirmed within poll budget, proceeding");
            }
            Err(err) if is_auth(&err) => return Err(err),
            Err(err) => return self.compensate(base, session, user_id, err).await,
        }

        // Unblocking
        if let Err(err) = self.unblock_at(base, session, user_id).await {
            if is_auth(&err) {
                return Err(err);
            }
            return self.compensate(base, session, user_id, err).await;
        }
        info!(user_id, "unblock issued, verifying");

        // UnblockVerifying: the operation's purpose is to leave the target
        // unblocked, so an unconfirmed final state is fatal
        let verified = poll_until(
            || async { self.is_blocked_at(base, session, user_id).await },
            |blocked| !*blocked,
            poll.max_attempts,
            poll.interval,
        )
        .await;
        match verified {
            Ok(true) => {
                info!(user_id, "kick complete");
                Ok(())
            }
            Ok(false) => {
                Err(ClientError::VerificationTimeout { attempts: poll.max_attempts })
            }
            Err(err) if is_auth(&err) => Err(err),
            Err(err) => self.compensate(base, session, user_id, err).await,
        }
    }

    /// Compensating cleanup after a post-block failure
    ///
    /// A successful cleanup must not mask the original failure; a failed one
    /// surfaces both errors.
    async fn compensate(
        &self,
        base: &str,
        session: &Session,
        user_id: u64,
        original: ClientError,
    ) -> Result<(), ClientError> {
        warn!(user_id, error = %original, "kick failed after block, attempting compensating unblock");
        match self.guaranteed_unblock(base, session, user_id).await {
            Ok(()) => Err(original),
            Err(cleanup) => Err(ClientError::CleanupFailed {
                original: Box::new(original),
                cleanup: Box::new(cleanup),
            }),
        }
    }

    /// Bounded-retry unblock used for cleanup, bypassing the orchestrator
    async fn guaranteed_unblock(
        &self,
        base: &str,
        session: &Session,
        user_id: u64,
    ) -> Result<(), ClientError> {
        let url = format!("{base}/v1/users/{user_id}/unblock");
        let mut last_error = None;

        for attempt in 1..=CLEANUP_ATTEMPTS {
            let result = self
                .client
                .dispatcher()
                .dispatch(&url, DispatchOptions::post().session(session))
                .await
                .and_then(|response| response.ensure_success().map(|_| ()));

            match result {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(user_id, attempt, error = %err, "cleanup unblock attempt failed");
                    last_error = Some(err);
                    if attempt < CLEANUP_ATTEMPTS {
                        tokio::time::sleep(CLEANUP_BACKOFF).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ClientError::Network("cleanup produced no attempts".to_string())))
    }

    async fn block_at(
        &self,
        base: &str,
        session: &Session,
        user_id: u64,
    ) -> Result<(), ClientError> {
        let url = format!("{base}/v1/users/{user_id}/block");
        self.client
            .executor()
            .execute_with_session("moderation.block", Some(session), || async {
                self.client
                    .dispatcher()
                    .dispatch(&url, DispatchOptions::post().session(session))
                    .await?
                    .ensure_success()
                    .map(|_| ())
            })
            .await
    }

    async fn unblock_at(
        &self,
        base: &str,
        session: &Session,
        user_id: u64,
    ) -> Result<(), ClientError> {
        let url = format!("{base}/v1/users/{user_id}/unblock");
        self.client
            .executor()
            .execute_with_session("moderation.unblock", Some(session), || async {
                self.client
                    .dispatcher()
                    .dispatch(&url, DispatchOptions::post().session(session))
                    .await?
                    .ensure_success()
                    .map(|_| ())
            })
            .await
    }

    async fn is_blocked_at(
        &self,
        base: &str,
        session: &Session,
        user_id: u64,
    ) -> Result<bool, ClientError> {
        let url = format!("{base}/v1/users/{user_id}/is-blocked");
        self.client
            .executor()
            .execute_with_session("moderation.is_blocked", Some(session), || async {
                self.client
                    .dispatcher()
                    .dispatch(&url, DispatchOptions::get().session(session))
                    .await?
                    .ensure_success()?
                    .json::<bool>()
            })
            .await
    }
}

fn is_auth(err: &ClientError) -> bool {
    matches!(err, ClientError::NotAuthenticated) || err.kind() == ErrorKind::Auth
}
