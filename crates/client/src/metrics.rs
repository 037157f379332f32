//! Process-wide counters for observability
//!
//! These counters have no correctness role; they exist so operators can tell
//! "will never succeed" apart from "exhausted transient retries" after the
//! fact. All counters are monotonic and lock-free.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared across every orchestrated call of one client instance
#[derive(Debug, Default)]
pub struct ClientMetrics {
    requests: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    circuit_trips: AtomicU64,
    rate_limit_waits: AtomicU64,
    token_refreshes: AtomicU64,
}

impl ClientMetrics {
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_circuit_trip(&self) {
        self.circuit_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limit_wait(&self) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_token_refresh(&self) {
        self.token_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Acquire),
            retries: self.retries.load(Ordering::Acquire),
            failures: self.failures.load(Ordering::Acquire),
            circuit_trips: self.circuit_trips.load(Ordering::Acquire),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Acquire),
            token_refreshes: self.token_refreshes.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time view of [`ClientMetrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub retries: u64,
    pub failures: u64,
    pub circuit_trips: u64,
    pub rate_limit_waits: u64,
    pub token_refreshes: u64,
}
