//! Resilient client for the platform's REST and realtime APIs.
//!
//! Authenticates with browser-session cookies and exposes typed wrappers for
//! account, friend, chat, and moderation operations. The core of the crate is
//! the layered dispatch pipeline: anti-forgery token lifecycle, proxy routing
//! with one-shot direct fallback, a circuit breaker and token bucket shared
//! across all calls, jittered exponential backoff, and state-verification
//! polling for composite operations.
//!
//! ```no_run
//! use palisade_client::{ClientConfig, PlatformClient, Session};
//!
//! # async fn example() -> Result<(), palisade_client::ClientError> {
//! let client = PlatformClient::new(ClientConfig::default())?;
//! let session = Session::new(std::env::var("PLATFORM_SESSION").unwrap_or_default());
//!
//! client.moderation().kick(&session, 42, None).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod api;
pub mod config;
pub mod csrf;
pub mod errors;
pub mod executor;
pub mod http;
pub mod metrics;
pub mod notify;
pub mod poll;
pub mod proxy;
pub mod session;

mod client;

// Re-export the primary surface
// ------------------------
pub use client::PlatformClient;
pub use config::{ClientConfig, CsrfConfig, PollConfig};
pub use csrf::CsrfTokenManager;
pub use errors::{ClientError, ErrorKind};
pub use executor::ResilienceOrchestrator;
pub use self::http::{DispatchOptions, DispatchResponse, Dispatcher};
pub use metrics::MetricsSnapshot;
pub use notify::{
    EventTracker, NotificationConfig, NotificationEvent, NotificationSubscription,
    SubscriptionState,
};
pub use poll::poll_until;
pub use proxy::{ProxyConfig, ProxyOverride, ProxyRoute};
pub use session::Session;
