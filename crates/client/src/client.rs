//! Client facade
//!
//! One [`PlatformClient`] owns the shared resilience state (circuit breaker,
//! rate limiter, anti-forgery cache, metrics) and hands out the endpoint
//! wrappers. Constructing a fresh client per test gives full isolation; a
//! process normally builds exactly one and shares it.

use std::future::Future;
use std::sync::Arc;

use palisade_common::resilience::{CircuitBreakerSnapshot, CircuitState};
use tokio::sync::mpsc;

use crate::api::{Chat, Friends, Moderation, Users};
use crate::config::ClientConfig;
use crate::csrf::CsrfTokenManager;
use crate::errors::ClientError;
use crate::executor::ResilienceOrchestrator;
use crate::http::{DispatchOptions, DispatchResponse, Dispatcher};
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::notify::{
    subscribe, EventTracker, NotificationConfig, NotificationEvent, NotificationSubscription,
};
use crate::session::Session;

/// Client for the platform's REST and realtime APIs
pub struct PlatformClient {
    config: Arc<ClientConfig>,
    csrf: CsrfTokenManager,
    dispatcher: Dispatcher,
    executor: ResilienceOrchestrator,
    metrics: Arc<ClientMetrics>,
    tracker: EventTracker,
}

impl PlatformClient {
    /// Create a client from a validated configuration
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(ClientMetrics::default());

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            // Redirects stay observable so login redirects can be detected
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;

        let csrf = CsrfTokenManager::new(http.clone(), config.csrf.clone(), Arc::clone(&metrics));
        let dispatcher = Dispatcher::new(http, Arc::clone(&config), csrf.clone());
        let executor =
            ResilienceOrchestrator::new(&config, csrf.clone(), Arc::clone(&metrics))?;

        Ok(Self {
            config,
            csrf,
            dispatcher,
            executor,
            metrics,
            tracker: EventTracker::new("palisade"),
        })
    }

    /// Create a client with default configuration
    pub fn with_defaults() -> Result<Self, ClientError> {
        Self::new(ClientConfig::default())
    }

    /// The active configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send one request through the dispatch pipeline
    pub async fn dispatch(
        &self,
        url: &str,
        options: DispatchOptions<'_>,
    ) -> Result<DispatchResponse, ClientError> {
        self.dispatcher.dispatch(url, options).await
    }

    /// Get a valid anti-forgery token for the session
    pub async fn csrf_token(
        &self,
        session: &Session,
        force_refresh: bool,
    ) -> Result<String, ClientError> {
        self.csrf.token(session, force_refresh).await
    }

    /// Run an arbitrary operation through the shared resilience stack
    pub async fn execute<T, F, Fut>(&self, name: &str, op: F) -> Result<T, ClientError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.executor.execute(name, op).await
    }

    /// Moderation endpoints (block/unblock/is-blocked/kick)
    pub fn moderation(&self) -> Moderation<'_> {
        Moderation::new(self)
    }

    /// User lookups
    pub fn users(&self) -> Users<'_> {
        Users::new(self)
    }

    /// Friendship endpoints
    pub fn friends(&self) -> Friends<'_> {
        Friends::new(self)
    }

    /// Chat endpoints
    pub fn chat(&self) -> Chat<'_> {
        Chat::new(self)
    }

    /// Subscribe to the session's realtime notifications
    pub fn subscribe_notifications(
        &self,
        session: &Session,
        config: NotificationConfig,
    ) -> (NotificationSubscription, mpsc::Receiver<NotificationEvent>) {
        subscribe(session, config)
    }

    /// Point-in-time counter values
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Current circuit breaker state
    pub fn circuit_state(&self) -> CircuitState {
        self.executor.circuit_state()
    }

    /// Circuit breaker details for observability
    pub fn circuit_snapshot(&self) -> CircuitBreakerSnapshot {
        self.executor.circuit_snapshot()
    }

    /// Tokens currently available in the rate limiter
    pub fn available_tokens(&self) -> u64 {
        self.executor.available_tokens()
    }

    /// Drop a session's cached anti-forgery token
    pub fn invalidate_csrf(&self, session: &Session) {
        self.csrf.invalidate(session);
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn executor(&self) -> &ResilienceOrchestrator {
        &self.executor
    }

    pub(crate) fn tracker(&self) -> &EventTracker {
        &self.tracker
    }
}
