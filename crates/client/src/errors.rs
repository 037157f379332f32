//! Client error taxonomy with retry classification
//!
//! Every failure surfaced by the client maps to exactly one variant, and
//! every variant maps to one [`ErrorKind`] that the resilience orchestrator
//! uses to decide retryability. Fatal variants short-circuit the retry loop
//! entirely.

use std::time::Duration;

use thiserror::Error;

/// Categories of client errors for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection-level failures - retryable
    Network,
    /// Request exceeded its deadline - retryable
    Timeout,
    /// Server-mandated pushback (429) - retryable with mandated wait
    RateLimit,
    /// Authentication rejection (401, 403) - retryable after token refresh
    Auth,
    /// Server errors (5xx) - retryable
    Server,
    /// Client errors (4xx other than 401/403/429) - caller's input is invalid
    Client,
    /// Anything that defies classification - non-retryable
    Unknown,
}

impl ErrorKind {
    /// Check whether errors of this kind are worth another attempt
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::RateLimit
                | ErrorKind::Auth
                | ErrorKind::Server
        )
    }
}

/// Errors surfaced by the client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The platform redirected toward its login page; the session is gone.
    #[error("Not authenticated: the platform redirected to its login page")]
    NotAuthenticated,

    /// Every probe endpoint was exhausted without yielding a token.
    #[error("Could not acquire an anti-forgery token: {0}")]
    TokenAcquisition(String),

    /// The circuit breaker rejected the call without a network attempt.
    #[error("Circuit open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Authentication rejected ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Client error ({status}): {message}")]
    Client { status: u16, message: String },

    /// Post-condition never confirmed within the poll budget, on a path where
    /// confirmation is a correctness requirement.
    #[error("State verification did not confirm within {attempts} attempts")]
    VerificationTimeout { attempts: u32 },

    /// Both the operation and its compensating cleanup failed. The target may
    /// remain in a blocked state.
    #[error(
        "Operation failed ({original}); compensating cleanup also failed ({cleanup}); \
         the target may remain in a blocked state"
    )]
    CleanupFailed { original: Box<ClientError>, cleanup: Box<ClientError> },
}

impl ClientError {
    /// Map the error into its retry classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Auth { .. } | Self::NotAuthenticated => ErrorKind::Auth,
            Self::Server { .. } => ErrorKind::Server,
            Self::Client { .. } => ErrorKind::Client,
            Self::Config(_)
            | Self::TokenAcquisition(_)
            | Self::CircuitOpen { .. }
            | Self::VerificationTimeout { .. }
            | Self::CleanupFailed { .. } => ErrorKind::Unknown,
        }
    }

    /// Errors that must never be retried, regardless of their kind
    ///
    /// `NotAuthenticated` classifies as `Auth` so callers can distinguish it,
    /// but a login redirect cannot be repaired by a token refresh.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated
                | Self::TokenAcquisition(_)
                | Self::CircuitOpen { .. }
                | Self::Config(_)
                | Self::VerificationTimeout { .. }
                | Self::CleanupFailed { .. }
        )
    }

    /// Check whether this specific error should be retried
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal() && self.kind().is_retryable()
    }
}
