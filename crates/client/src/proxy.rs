//! Per-request proxy route resolution
//!
//! A request is routed through the external forwarding service only when its
//! host is in the configured domain set AND the configuration is enabled with
//! a non-empty key. The rewritten URL keeps the original path/query/fragment
//! and swaps scheme+host for the proxy base; the original host travels in a
//! `hostname` header so the forwarder knows where to send the request.
//!
//! Unparseable or scheme-relative-garbage input is treated as "do not proxy",
//! never as an error: proxying is an optimization, not a correctness
//! requirement.

use url::Url;

/// Process-wide proxy defaults, merged with an optional per-call override
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Master switch; nothing is proxied while false
    pub enabled: bool,
    /// Forwarding-service auth key; an empty key disables routing
    pub key: Option<String>,
    /// Base URL of the forwarding service, e.g. `https://fwd.proxy.example`
    pub base_url: Option<String>,
    /// Optional exit-country hint passed as `x-country`
    pub country: Option<String>,
    /// Host suffixes eligible for proxying
    pub domains: Vec<String>,
    /// Retry once over a direct connection when the proxied attempt fails
    pub fallback_on_error: bool,
}

/// Per-call override; present fields win over the process-wide defaults
#[derive(Debug, Clone, Default)]
pub struct ProxyOverride {
    pub enabled: Option<bool>,
    pub key: Option<String>,
    pub base_url: Option<String>,
    pub country: Option<String>,
    pub domains: Option<Vec<String>>,
    pub fallback_on_error: Option<bool>,
}

/// Resolved routing decision for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    /// Rewritten URL pointing at the forwarding service
    pub url: String,
    /// Headers to attach: `proxykey`, `hostname`, optional `x-country`
    pub headers: Vec<(String, String)>,
}

impl ProxyConfig {
    /// Merge a per-call override on top of these defaults, field by field
    pub fn merged(&self, override_with: Option<&ProxyOverride>) -> ProxyConfig {
        let Some(o) = override_with else {
            return self.clone();
        };
        ProxyConfig {
            enabled: o.enabled.unwrap_or(self.enabled),
            key: o.key.clone().or_else(|| self.key.clone()),
            base_url: o.base_url.clone().or_else(|| self.base_url.clone()),
            country: o.country.clone().or_else(|| self.country.clone()),
            domains: o.domains.clone().unwrap_or_else(|| self.domains.clone()),
            fallback_on_error: o.fallback_on_error.unwrap_or(self.fallback_on_error),
        }
    }

    /// Decide whether and how to route `target` through the proxy
    ///
    /// Returns `None` when the request should go direct: disabled config,
    /// missing/empty key or base, host not in the domain set, or input that
    /// does not parse as a URL.
    pub fn resolve(&self, target: &str) -> Option<ProxyRoute> {
        if !self.enabled {
            return None;
        }
        let key = self.key.as_deref().filter(|k| !k.is_empty())?;
        let base = self.base_url.as_deref().filter(|b| !b.is_empty())?;

        let parsed = Url::parse(&normalize_scheme_relative(target)).ok()?;
        let host = parsed.host_str()?;
        if !self.matches_domain(host) {
            return None;
        }

        let mut rewritten = Url::parse(base).ok()?;
        rewritten.set_path(parsed.path());
        rewritten.set_query(parsed.query());
        rewritten.set_fragment(parsed.fragment());

        let mut headers = vec![
            ("proxykey".to_string(), key.to_string()),
            ("hostname".to_string(), host.to_string()),
        ];
        if let Some(country) = self.country.as_deref().filter(|c| !c.is_empty()) {
            headers.push(("x-country".to_string(), country.to_string()));
        }

        Some(ProxyRoute { url: rewritten.into(), headers })
    }

    fn matches_domain(&self, host: &str) -> bool {
        self.domains.iter().any(|d| host == d || host.ends_with(&format!(".{d}")))
    }
}

/// Normalize a protocol-relative URL (`//host/path`) to secure HTTP
pub fn normalize_scheme_relative(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}

/// Compute the direct-retry URL used when a proxied attempt fails and the
/// fallback flag is set: proxy headers are stripped by the dispatcher, the
/// scheme is forced to secure HTTP, and the dispatcher flags the call so a
/// second fallback is never attempted.
pub fn fallback_url(original: &str) -> String {
    let normalized = normalize_scheme_relative(original);
    match normalized.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => normalized,
    }
}
