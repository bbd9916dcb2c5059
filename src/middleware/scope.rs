//! Settings scope resolution.
//!
//! Several front-end domains share one backend; each maps to a scope that
//! partitions the settings table. The caller's domain is taken from the
//! first usable of `Origin`, `Referer`, `X-Forwarded-Host` and `Host`, then
//! looked up in the configured mapping:
//!
//! ```text
//! { "example.com": "scope-a", "*.example.com": "scope-a", ".other.org": "scope-b" }
//! ```
//!
//! Exact entries win over wildcards; among wildcards the longest suffix
//! wins. Unknown domains resolve to `default`.

use axum::http::{header, HeaderMap};
use std::collections::HashMap;

use crate::models::DEFAULT_SCOPE;

/// Header letting web clients pin a scope explicitly
pub const SCOPE_HEADER: &str = "x-scope";

/// Process-wide domain to scope mapping
#[derive(Debug, Default)]
pub struct ScopeResolver {
    exact: HashMap<String, String>,
    /// `(suffix, scope)`, longest suffix first
    wildcards: Vec<(String, String)>,
}

impl ScopeResolver {
    pub fn new(map: &HashMap<String, String>) -> Self {
        let mut exact = HashMap::new();
        let mut wildcards = Vec::new();

        for (domain, scope) in map {
            let domain = domain.trim().to_ascii_lowercase();
            if let Some(suffix) = domain.strip_prefix("*.").or_else(|| domain.strip_prefix('.')) {
                if !suffix.is_empty() {
                    wildcards.push((suffix.to_string(), scope.clone()));
                }
            } else if !domain.is_empty() {
                exact.insert(normalize_host(&domain), scope.clone());
            }
        }

        wildcards.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { exact, wildcards }
    }

    /// Scope of a normalized host, if mapped
    pub fn lookup(&self, host: &str) -> Option<&str> {
        if let Some(scope) = self.exact.get(host) {
            return Some(scope);
        }

        self.wildcards
            .iter()
            .find(|(suffix, _)| {
                host == suffix
                    || (host.len() > suffix.len()
                        && host.ends_with(suffix.as_str())
                        && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
            })
            .map(|(_, scope)| scope.as_str())
    }

    /// Resolve the scope of a request from its origin headers
    pub fn resolve(&self, headers: &HeaderMap) -> String {
        request_host(headers)
            .and_then(|host| self.lookup(&host).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_SCOPE.to_string())
    }
}

/// Lowercase, drop quotes, port and a leading `www.`
pub fn normalize_host(raw: &str) -> String {
    let host = raw.trim().trim_matches(|c| c == '"' || c == '\'').to_ascii_lowercase();

    let without_port = if host.starts_with('[') {
        // IPv6 literal: keep the bracketed address
        match host.find(']') {
            Some(end) => host[..=end].to_string(),
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
            _ => host,
        }
    };

    without_port
        .strip_prefix("www.")
        .map(str::to_string)
        .unwrap_or(without_port)
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "null")
}

fn url_host(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(normalize_host))
        .filter(|h| !h.is_empty())
}

/// The caller's normalized host: Origin, Referer, X-Forwarded-Host, Host
pub fn request_host(headers: &HeaderMap) -> Option<String> {
    if let Some(host) = header_str(headers, header::ORIGIN).and_then(url_host) {
        return Some(host);
    }
    if let Some(host) = header_str(headers, header::REFERER).and_then(url_host) {
        return Some(host);
    }

    ["x-forwarded-host", "host"]
        .iter()
        .filter_map(|name| header_str(headers, *name))
        .filter_map(|raw| raw.split(',').next())
        .map(normalize_host)
        .find(|h| !h.is_empty())
}

/// Explicit scope sent by a web client
pub fn scope_override(headers: &HeaderMap) -> Option<String> {
    header_str(headers, SCOPE_HEADER).map(|s| s.to_string())
}
