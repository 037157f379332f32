//! HTTP dispatch pipeline
//!
//! One layer below the resilience orchestrator: a single dispatch call sends
//! one logical request, handling session-cookie injection, proxy routing,
//! stale-token retry, and the one-shot direct fallback.

pub mod dispatcher;

pub use dispatcher::{DispatchOptions, DispatchResponse, Dispatcher};
