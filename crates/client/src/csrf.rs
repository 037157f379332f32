//! Anti-forgery token lifecycle
//!
//! Mutating calls must carry an `x-csrf-token` header. Tokens are acquired by
//! probing a small ordered list of lightweight mutating endpoints: the
//! platform answers those with a fresh token in the response headers even
//! when it rejects the call itself. Acquired tokens are cached per session
//! with a fixed TTL, refreshes for the same session are coalesced behind one
//! lock, and every successful refresh re-arms a proactive background refresh
//! shortly before expiry so foreground callers rarely observe a cold cache.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CsrfConfig;
use crate::errors::ClientError;
use crate::metrics::ClientMetrics;
use crate::session::Session;

const TOKEN_HEADER: &str = "x-csrf-token";

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Per-session cache slot; the refresh mutex is the one place true mutual
/// exclusion is required (one in-flight refresh per session identity)
struct SessionEntry {
    cached: RwLock<Option<CachedToken>>,
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            cached: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_task: Mutex::new(None),
        }
    }

    fn fresh_token(&self, now: Instant) -> Option<String> {
        let guard = self.cached.read().ok()?;
        guard.as_ref().filter(|c| c.expires_at > now).map(|c| c.token.clone())
    }

    fn store(&self, token: String, expires_at: Instant) {
        if let Ok(mut guard) = self.cached.write() {
            *guard = Some(CachedToken { token, expires_at });
        }
    }

    fn clear(&self) {
        if let Ok(mut guard) = self.cached.write() {
            *guard = None;
        }
    }
}

impl Drop for SessionEntry {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.refresh_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

/// Token cache with coalesced refresh
///
/// Cloning shares the underlying cache; one manager serves every session the
/// process works with.
#[derive(Clone)]
pub struct CsrfTokenManager {
    http: reqwest::Client,
    config: Arc<CsrfConfig>,
    entries: Arc<DashMap<u64, Arc<SessionEntry>>>,
    metrics: Arc<ClientMetrics>,
}

impl CsrfTokenManager {
    pub(crate) fn new(
        http: reqwest::Client,
        config: CsrfConfig,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self { http, config: Arc::new(config), entries: Arc::new(DashMap::new()), metrics }
    }

    fn entry(&self, session: &Session) -> Arc<SessionEntry> {
        self.entries
            .entry(session.identity())
            .or_insert_with(|| Arc::new(SessionEntry::new()))
            .clone()
    }

    /// Get a valid token for the session, refreshing if needed
    ///
    /// Returns the cached token when present and unexpired unless
    /// `force_refresh` is set. Concurrent refreshes for the same session
    /// share one in-flight probe sequence.
    pub async fn token(
        &self,
        session: &Session,
        force_refresh: bool,
    ) -> Result<String, ClientError> {
        if !session.has_secret() {
            return Err(ClientError::NotAuthenticated);
        }

        let entry = self.entry(session);

        if !force_refresh {
            if let Some(token) = entry.fresh_token(Instant::now()) {
                return Ok(token);
            }
        }

        let _refresh = entry.refresh_lock.lock().await;

        // A coalesced waiter finds the cache warm once the lock is released
        if !force_refresh {
            if let Some(token) = entry.fresh_token(Instant::now()) {
                debug!("token refresh coalesced with an in-flight refresh");
                return Ok(token);
            }
        }

        let token = self.probe_endpoints(session).await?;
        entry.store(token.clone(), Instant::now() + self.config.ttl);
        self.metrics.record_token_refresh();
        self.schedule_proactive_refresh(session, &entry);
        Ok(token)
    }

    /// Adopt a token the server handed back on a 403 response
    ///
    /// The dispatcher calls this when a mutating request that already carried
    /// a token is rejected with a fresh one in the response headers: that is
    /// "stale token", not a real failure.
    pub(crate) fn adopt(&self, session: &Session, token: &str) {
        let entry = self.entry(session);
        entry.store(token.to_string(), Instant::now() + self.config.ttl);
        self.metrics.record_token_refresh();
    }

    /// Drop the cached token so the next call performs a full refresh
    pub fn invalidate(&self, session: &Session) {
        self.entry(session).clear();
    }

    async fn probe_endpoints(&self, session: &Session) -> Result<String, ClientError> {
        for probe in &self.config.probe_urls {
            let mut request = self
                .http
                .post(probe)
                .header("cookie", session.cookie_header())
                .header("content-length", "0");
            if let Some(key) = session.api_key() {
                request = request.header("x-api-key", key);
            }

            match request.send().await {
                Ok(response) => {
                    if let Some(token) =
                        response.headers().get(TOKEN_HEADER).and_then(|v| v.to_str().ok())
                    {
                        if !token.is_empty() {
                            debug!(endpoint = %probe, "acquired anti-forgery token");
                            return Ok(token.to_string());
                        }
                    }
                    debug!(endpoint = %probe, status = %response.status(), "probe carried no token");
                }
                Err(err) => {
                    warn!(endpoint = %probe, error = %err, "token probe failed");
                }
            }
        }

        Err(ClientError::TokenAcquisition(format!(
            "all {} probe endpoints exhausted without yielding a token",
            self.config.probe_urls.len()
        )))
    }

    /// Re-arm the background refresh that fires shortly before expiry
    fn schedule_proactive_refresh(&self, session: &Session, entry: &SessionEntry) {
        let delay = self.config.ttl.saturating_sub(self.config.refresh_margin);
        if delay.is_zero() {
            return;
        }

        let manager = self.clone();
        let session = session.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = manager.token(&session, true).await {
                warn!(error = %err, "proactive token refresh failed");
            }
        });

        if let Ok(mut slot) = entry.refresh_task.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn manager_with_probes(probes: Vec<String>) -> CsrfTokenManager {
        let config = CsrfConfig {
            probe_urls: probes,
            ttl: Duration::from_secs(300),
            refresh_margin: Duration::from_secs(30),
        };
        CsrfTokenManager::new(
            reqwest::Client::new(),
            config,
            Arc::new(ClientMetrics::default()),
        )
    }

    #[tokio::test]
    async fn missing_session_fails_immediately() {
        let manager = manager_with_probes(vec!["https://auth.platform.example/x".to_string()]);
        let result = manager.token(&Session::new(""), false).await;
        assert!(matches!(result, Err(ClientError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn adopt_warms_the_cache() {
        let manager = manager_with_probes(vec!["https://auth.platform.example/x".to_string()]);
        let session = Session::new("secret");

        manager.adopt(&session, "T2");
        let token = manager.token(&session, false).await.expect("cached token");
        assert_eq!(token, "T2");
    }

    #[tokio::test]
    async fn invalidate_clears_the_cache() {
        let manager = manager_with_probes(vec![]);
        let session = Session::new("secret");

        manager.adopt(&session, "T1");
        manager.invalidate(&session);

        // Empty probe list means a refresh must fail, proving the cache is cold
        let result = manager.token(&session, false).await;
        assert!(matches!(result, Err(ClientError::TokenAcquisition(_))));
    }

    #[tokio::test]
    async fn entries_are_per_session_identity() {
        let manager = manager_with_probes(vec![]);
        let alice = Session::new("alice");
        let bob = Session::new("bob");

        manager.adopt(&alice, "TA");
        manager.adopt(&bob, "TB");

        assert_eq!(manager.token(&alice, false).await.expect("alice token"), "TA");
        assert_eq!(manager.token(&bob, false).await.expect("bob token"), "TB");
    }
}
