//! Typed endpoint wrappers
//!
//! Thin per-endpoint functions routed through the resilience orchestrator.
//! Failure bodies follow the platform's `{errors:[{message}]}` envelope,
//! decoded into the error taxonomy by the dispatcher.

pub mod chat;
pub mod friends;
pub mod moderation;
pub mod users;

use serde::Deserialize;

pub use chat::{Chat, SentMessage};
pub use friends::Friends;
pub use moderation::Moderation;
pub use users::{AuthenticatedUser, UserDetails, Users};

/// The platform's error envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorEnvelope {
    pub errors: Vec<ApiErrorMessage>,
}

/// One entry of the error envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorMessage {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

/// Normalize an API host into a base URL: bare hosts get a secure scheme,
/// explicit base URLs pass through with any trailing slash removed
pub(crate) fn host_base(api_host: &str) -> String {
    let base = if api_host.contains("://") {
        api_host.to_string()
    } else {
        format!("https://{api_host}")
    };
    base.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses() {
        let body = r#"{"errors":[{"code":3,"message":"Target user is invalid."}]}"#;
        let envelope: ApiErrorEnvelope = serde_json::from_str(body).expect("envelope");
        assert_eq!(envelope.errors.len(), 1);
        assert_eq!(envelope.errors[0].code, Some(3));
        assert_eq!(envelope.errors[0].message, "Target user is invalid.");
    }

    #[test]
    fn host_base_normalization() {
        assert_eq!(host_base("api.example.com"), "https://api.example.com");
        assert_eq!(host_base("http://127.0.0.1:8080/"), "http://127.0.0.1:8080");
        assert_eq!(host_base("https://apis.platform.example"), "https://apis.platform.example");
    }
}
