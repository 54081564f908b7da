//! Outbound URL validation.
//!
//! Rules run in a fixed order: dangerous scheme, parse, scheme allowlist,
//! HTTPS requirement, private address, host denylist, URL pattern denylist,
//! host allowlist. The first failing rule decides. Nothing here panics or
//! returns an error for bad input; malformed URLs are simply not allowed.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::LazyLock,
};

use agent_gate_core::UrlFilterConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::SecurityError;

/// Schemes that are rejected before any other rule runs.
static DANGEROUS_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(javascript|data|vbscript|file|about|blob|filesystem|jar):")
        .expect("dangerous scheme pattern is valid")
});

/// Result of validating one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlValidationResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
}

impl UrlValidationResult {
    fn allow(matched_rule: Option<String>) -> Self {
        Self {
            allowed: true,
            reason: None,
            matched_rule,
        }
    }

    fn deny(reason: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            matched_rule: Some(rule.into()),
        }
    }
}

/// Wildcard host pattern such as `*.example.com` or `api-*.corp`.
#[derive(Debug, Clone)]
struct HostPattern {
    raw: String,
    regex: Regex,
}

impl HostPattern {
    fn compile(pattern: &str) -> Result<Self, SecurityError> {
        let raw = pattern.trim().to_ascii_lowercase();
        let body = match raw.strip_prefix("*.") {
            // `*.example.com` also covers `example.com` itself.
            Some(suffix) => format!(r"(?:.*\.)?{}", regex::escape(suffix)),
            None => raw
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*"),
        };
        let regex = Regex::new(&format!("^{body}$"))
            .map_err(|e| SecurityError::invalid_pattern(pattern, e))?;
        Ok(Self { raw, regex })
    }

    fn matches(&self, host: &str) -> bool {
        self.regex.is_match(host)
    }
}

/// Stateless evaluator for outbound resource access.
#[derive(Debug, Clone)]
pub struct UrlFilter {
    allowed_schemes: Vec<String>,
    require_https: bool,
    block_private_addresses: bool,
    host_allowlist: Vec<HostPattern>,
    host_denylist: Vec<HostPattern>,
    denied_patterns: Vec<Regex>,
}

impl Default for UrlFilter {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["http".into(), "https".into()],
            require_https: false,
            block_private_addresses: true,
            host_allowlist: Vec::new(),
            host_denylist: Vec::new(),
            denied_patterns: Vec::new(),
        }
    }
}

impl UrlFilter {
    /// Build a filter from configuration.
    ///
    /// # Errors
    /// Returns error if a host pattern or denied pattern does not compile.
    pub fn new(config: &UrlFilterConfig) -> Result<Self, SecurityError> {
        let compile_hosts = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| HostPattern::compile(p))
                .collect::<Result<Vec<_>, _>>()
        };
        let denied_patterns = config
            .denied_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| SecurityError::invalid_pattern(p, e)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            allowed_schemes: config
                .allowed_schemes
                .iter()
                .map(|s| s.trim().trim_end_matches(':').to_ascii_lowercase())
                .collect(),
            require_https: config.require_https,
            block_private_addresses: config.block_private_addresses,
            host_allowlist: compile_hosts(&config.host_allowlist)?,
            host_denylist: compile_hosts(&config.host_denylist)?,
            denied_patterns,
        })
    }

    /// Validate a URL against every rule.
    #[must_use]
    pub fn validate_url(&self, url: &str) -> UrlValidationResult {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return UrlValidationResult::deny("URL is empty", "input");
        }

        if let Some(scheme) = dangerous_scheme(trimmed) {
            return UrlValidationResult::deny(
                format!("Dangerous URL scheme '{scheme}:' is not allowed"),
                format!("scheme:{scheme}"),
            );
        }

        let parsed = match Url::parse(trimmed) {
            Ok(parsed) => parsed,
            Err(e) => return UrlValidationResult::deny(format!("Invalid URL format: {e}"), "input"),
        };

        let scheme = parsed.scheme();
        if !self.allowed_schemes.iter().any(|s| s == scheme) {
            return UrlValidationResult::deny(
                format!("URL scheme '{scheme}:' is not allowed"),
                format!("scheme:{scheme}"),
            );
        }
        if self.require_https && scheme != "https" {
            return UrlValidationResult::deny("HTTPS is required", "require-https");
        }

        let Some(host) = parsed.host() else {
            return UrlValidationResult::deny("URL must have a host", "input");
        };
        let host_name = host_label(&host);

        if self.block_private_addresses && is_internal_host(&host) {
            return UrlValidationResult::deny(
                format!("Private or loopback address '{host_name}' is not allowed"),
                "private-address",
            );
        }

        if let Some(rule) = self.host_denylist.iter().find(|p| p.matches(&host_name)) {
            return UrlValidationResult::deny(
                format!("Host '{host_name}' is denied"),
                format!("host-denylist:{}", rule.raw),
            );
        }

        if let Some(pattern) = self.denied_patterns.iter().find(|p| p.is_match(parsed.as_str())) {
            return UrlValidationResult::deny(
                "URL matches a denied pattern",
                format!("pattern:{}", pattern.as_str()),
            );
        }

        if self.host_allowlist.is_empty() {
            return UrlValidationResult::allow(None);
        }
        match self.host_allowlist.iter().find(|p| p.matches(&host_name)) {
            Some(rule) => UrlValidationResult::allow(Some(format!("host-allowlist:{}", rule.raw))),
            None => UrlValidationResult::deny(
                format!("Host '{host_name}' is not in the allowlist"),
                "host-allowlist",
            ),
        }
    }

    /// Whether the URL passes every rule.
    #[must_use]
    pub fn is_url_allowed(&self, url: &str) -> bool {
        self.validate_url(url).allowed
    }

    /// Whether the URL uses a scheme that is never fetched.
    #[must_use]
    pub fn is_dangerous_url(&self, url: &str) -> bool {
        dangerous_scheme(url).is_some()
    }
}

/// Lowercased dangerous scheme of `url`, if any.
///
/// Whitespace and control characters are ignored, since user agents strip
/// them from schemes (`java\tscript:`).
#[must_use]
pub fn dangerous_scheme(url: &str) -> Option<String> {
    let compact: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .take(32)
        .collect();
    DANGEROUS_SCHEME
        .captures(&compact)
        .map(|caps| caps[1].to_ascii_lowercase())
}

fn host_label(host: &Host<&str>) -> String {
    match host {
        Host::Domain(domain) => domain.trim_end_matches('.').to_ascii_lowercase(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    }
}

fn is_internal_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_internal_address(IpAddr::V4(*ip)),
        Host::Ipv6(ip) => is_internal_address(IpAddr::V6(*ip)),
    }
}

/// Loopback, private, link-local, shared, unspecified or broadcast address.
#[must_use]
pub fn is_internal_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => is_internal_v6(v6),
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}
