//! Session credential handling
//!
//! A [`Session`] stands in for the browser login cookie. It is owned by the
//! caller, passed by reference into every dispatch, and never mutated by the
//! client. The dispatcher renders it into a `Cookie` header instead of
//! relying on cookie-jar semantics, so no credential state ever persists
//! inside the HTTP client.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque authentication credential: session secret plus optional API key
#[derive(Clone)]
pub struct Session {
    secret: String,
    api_key: Option<String>,
}

impl Session {
    /// Create a session from the browser-session secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into(), api_key: None }
    }

    /// Attach an API key sent alongside the session cookie
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Render the session as a `Cookie` header value
    pub fn cookie_header(&self) -> String {
        format!(".SESSIONCOOKIE={};", self.secret)
    }

    /// The API key, if one was attached
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub(crate) fn has_secret(&self) -> bool {
        !self.secret.is_empty()
    }

    /// Stable identity for per-session caches; never exposes the secret
    pub(crate) fn identity(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.secret.hash(&mut hasher);
        hasher.finish()
    }
}

// The secret must never leak into logs or error messages
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("secret", &"<redacted>")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_format() {
        let session = Session::new("s3cr3t");
        assert_eq!(session.cookie_header(), ".SESSIONCOOKIE=s3cr3t;");
    }

    #[test]
    fn debug_redacts_secret() {
        let session = Session::new("s3cr3t").with_api_key("key-123");
        let debug = format!("{session:?}");
        assert!(!debug.contains("s3cr3t"));
        assert!(!debug.contains("key-123"));
    }

    #[test]
    fn identity_is_stable_per_secret() {
        let a = Session::new("alpha");
        let b = Session::new("alpha");
        let c = Session::new("beta");
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn empty_secret_is_detected() {
        assert!(!Session::new("").has_secret());
        assert!(Session::new("x").has_secret());
    }
}
