//! Single-request dispatch
//!
//! Responsibilities, in order: lower-case all header keys, convert the
//! session into a `Cookie` header plus API-key header (no cookie jar),
//! normalize protocol-relative URLs to secure HTTP, apply the proxy route if
//! one resolves, and issue the network call with the configured global
//! timeout over persistent connections. Redirects toward the platform's
//! login page fail with `NotAuthenticated`; a 403 carrying a fresh token
//! header is retried once with the new token; a failed proxied attempt is
//! retried once directly when the fallback flag is set.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::csrf::CsrfTokenManager;
use crate::errors::ClientError;
use crate::proxy::{fallback_url, normalize_scheme_relative, ProxyOverride};
use crate::session::Session;

const TOKEN_HEADER: &str = "x-csrf-token";

/// Options for one dispatch call
#[derive(Debug, Default)]
pub struct DispatchOptions<'a> {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub session: Option<&'a Session>,
    pub verification_token: Option<&'a str>,
    /// Attach an anti-forgery token (mutating calls)
    pub with_csrf: bool,
    /// Treat a redirect toward the login page as `NotAuthenticated`
    pub check_login_redirect: bool,
    /// Per-call proxy override, merged field-by-field over the defaults
    pub proxy_override: Option<&'a ProxyOverride>,
    /// Per-call timeout override
    pub timeout: Option<Duration>,
}

impl<'a> DispatchOptions<'a> {
    /// Options for a read-only GET
    pub fn get() -> Self {
        Self { method: Method::GET, check_login_redirect: true, ..Self::default() }
    }

    /// Options for a mutating POST; carries an anti-forgery token
    pub fn post() -> Self {
        Self {
            method: Method::POST,
            with_csrf: true,
            check_login_redirect: true,
            ..Self::default()
        }
    }

    pub fn session(mut self, session: &'a Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn verification_token(mut self, token: &'a str) -> Self {
        self.verification_token = Some(token);
        self
    }

    pub fn proxy_override(mut self, override_with: &'a ProxyOverride) -> Self {
        self.proxy_override = Some(override_with);
        self
    }

    /// Opt out of the login-redirect check
    pub fn skip_login_check(mut self) -> Self {
        self.check_login_redirect = false;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Response from one dispatch call
#[derive(Debug)]
pub struct DispatchResponse {
    pub status: StatusCode,
    /// Case-insensitive response headers
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl DispatchResponse {
    /// Look up a response header as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Response body as text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the response body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ClientError::Client { status: self.status.as_u16(), message: format!("failed to parse response body: {e}") })
    }

    /// Map a non-success status into the error taxonomy
    ///
    /// Decodes the platform's `{errors:[{message}]}` envelope when present.
    pub fn ensure_success(self) -> Result<Self, ClientError> {
        if self.status.is_success() {
            return Ok(self);
        }
        Err(self.status_error())
    }

    fn status_error(&self) -> ClientError {
        let status = self.status.as_u16();
        let message = self.error_message();

        if self.status == StatusCode::UNAUTHORIZED || self.status == StatusCode::FORBIDDEN {
            ClientError::Auth { status, message }
        } else if self.status == StatusCode::TOO_MANY_REQUESTS {
            ClientError::RateLimited { retry_after: self.retry_after() }
        } else if self.status.is_server_error() {
            ClientError::Server { status, message }
        } else if self.status.is_client_error() {
            ClientError::Client { status, message }
        } else {
            ClientError::Network(format!("unexpected status {status}: {message}"))
        }
    }

    fn error_message(&self) -> String {
        if let Ok(envelope) = serde_json::from_slice::<crate::api::ApiErrorEnvelope>(&self.body) {
            let messages: Vec<String> =
                envelope.errors.into_iter().map(|e| e.message).collect();
            if !messages.is_empty() {
                return messages.join("; ");
            }
        }
        let text = self.text();
        text.chars().take(200).collect()
    }

    fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after").and_then(|v| v.parse::<u64>().ok()).map(Duration::from_secs)
    }
}

/// Sends one logical request with the platform's authentication quirks
/// handled in-line
pub struct Dispatcher {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    csrf: CsrfTokenManager,
}

impl Dispatcher {
    pub(crate) fn new(
        http: reqwest::Client,
        config: Arc<ClientConfig>,
        csrf: CsrfTokenManager,
    ) -> Self {
        Self { http, config, csrf }
    }

    /// Send one request
    pub async fn dispatch(
        &self,
        url: &str,
        options: DispatchOptions<'_>,
    ) -> Result<DispatchResponse, ClientError> {
        let url = normalize_scheme_relative(url);

        // Case-insensitive merge safety
        let mut headers: Vec<(String, String)> = options
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();

        if let Some(session) = options.session {
            let mut cookie = session.cookie_header();
            if let Some(vt) = options.verification_token {
                cookie.push_str(&format!(" VERIFICATIONTOKEN={vt};"));
            }
            upsert(&mut headers, "cookie", cookie);
            if let Some(key) = session.api_key() {
                upsert(&mut headers, "x-api-key", key.to_string());
            }
        } else if let Some(vt) = options.verification_token {
            upsert(&mut headers, "cookie", format!("VERIFICATIONTOKEN={vt};"));
        }

        if options.with_csrf {
            let session = options.session.ok_or(ClientError::NotAuthenticated)?;
            let token = self.csrf.token(session, false).await?;
            upsert(&mut headers, TOKEN_HEADER, token);
        }

        let effective_proxy = self.config.proxy.merged(options.proxy_override);
        let route = effective_proxy.resolve(&url);

        let (mut target, mut proxy_headers, mut proxied) = match route {
            Some(route) => (route.url, route.headers, true),
            None => (url.clone(), Vec::new(), false),
        };

        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let mut csrf_retried = false;
        let mut fallback_used = false;

        loop {
            let attempt = self
                .send_once(&target, &options.method, &headers, &proxy_headers, options.body.as_ref(), timeout)
                .await;

            match attempt {
                Ok(response) => {
                    if options.check_login_redirect && response.status.is_redirection() {
                        if let Some(location) = response.header("location") {
                            if location.contains(&self.config.login_redirect_marker) {
                                warn!(%location, "request redirected to the login page");
                                return Err(ClientError::NotAuthenticated);
                            }
                        }
                    }

                    // A 403 carrying a fresh token while we already sent one
                    // means "stale token", not a real failure
                    if response.status == StatusCode::FORBIDDEN && !csrf_retried {
                        let carried_token = headers.iter().any(|(k, _)| k == TOKEN_HEADER);
                        let fresh = response.header(TOKEN_HEADER).map(str::to_string);
                        if carried_token {
                            if let Some(fresh) = fresh.filter(|t| !t.is_empty()) {
                                csrf_retried = true;
                                if let Some(session) = options.session {
                                    self.csrf.adopt(session, &fresh);
                                }
                                upsert(&mut headers, TOKEN_HEADER, fresh);
                                debug!("stale anti-forgery token, retrying with refreshed token");
                                continue;
                            }
                        }
                    }

                    return Ok(response);
                }
                Err(err) => {
                    if proxied && effective_proxy.fallback_on_error && !fallback_used {
                        fallback_used = true;
                        proxied = false;
                        proxy_headers.clear();
                        target = fallback_url(&url);
                        warn!(error = %err, "proxied dispatch failed, retrying direct");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(
        &self,
        target: &str,
        method: &Method,
        headers: &[(String, String)],
        proxy_headers: &[(String, String)],
        body: Option<&serde_json::Value>,
        timeout: Duration,
    ) -> Result<DispatchResponse, ClientError> {
        let mut request = self.http.request(method.clone(), target).timeout(timeout);
        for (name, value) in headers.iter().chain(proxy_headers.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(%method, url = %target, "sending request");

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let headers = response.headers().clone();
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| ClientError::Network(format!("failed to read body: {e}")))?
                    .to_vec();
                debug!(%status, url = %target, "received response");
                Ok(DispatchResponse { status, headers, body })
            }
            Err(err) => {
                if err.is_timeout() {
                    Err(ClientError::Timeout(timeout))
                } else {
                    Err(ClientError::Network(err.to_string()))
                }
            }
        }
    }
}

fn upsert(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    match headers.iter_mut().find(|(k, _)| k == name) {
        Some(slot) => slot.1 = value,
        None => headers.push((name.to_string(), value)),
    }
}
