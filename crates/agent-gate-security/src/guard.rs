//! Screening with audit coverage.
//!
//! Every check records its decision before the verdict is handed back, so a
//! caller that ignores the verdict still leaves an audit trail.

use std::sync::Arc;

use agent_gate_core::SecurityConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    AuditEvent, AuditLog, ScriptSandbox, SecurityError, UrlFilter, UrlValidationResult,
    audit::actions,
};

/// Longest resource string stored in an audit event.
const MAX_RESOURCE_LEN: usize = 2048;

/// Verdict for a script or command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptVerdict {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Digest recorded in the audit log instead of the script text.
    pub digest: String,
}

/// `sha256:<hex>` digest of script text.
#[must_use]
pub fn script_digest(script: &str) -> String {
    format!("sha256:{:x}", Sha256::digest(script.as_bytes()))
}

/// URL filter, script screener and audit log composed together.
#[derive(Debug, Clone)]
pub struct SecurityGuard {
    url_filter: UrlFilter,
    sandbox: ScriptSandbox,
    audit: Arc<AuditLog>,
}

impl SecurityGuard {
    /// Compose a guard from its parts.
    #[must_use]
    pub const fn new(url_filter: UrlFilter, sandbox: ScriptSandbox, audit: Arc<AuditLog>) -> Self {
        Self {
            url_filter,
            sandbox,
            audit,
        }
    }

    /// Build the filter and screener from configuration.
    ///
    /// # Errors
    /// Returns error if a configured pattern does not compile.
    pub fn from_config(config: &SecurityConfig, audit: Arc<AuditLog>) -> Result<Self, SecurityError> {
        Ok(Self::new(
            UrlFilter::new(&config.url)?,
            ScriptSandbox::new(&config.script)?,
            audit,
        ))
    }

    /// Validate an outbound URL on behalf of `actor` and audit the result.
    pub fn check_url(&self, actor: &str, url: &str) -> UrlValidationResult {
        let result = self.url_filter.validate_url(url);
        let resource = bounded(url);
        let event = match &result.reason {
            Some(reason) if !result.allowed => {
                tracing::warn!(actor, url = %resource, reason = %reason, "Blocked URL");
                AuditEvent::blocked(actor, actions::URL_FETCH, resource, reason.clone())
            }
            _ => AuditEvent::allowed(actor, actions::URL_FETCH, resource),
        };
        self.audit.log_event(event);
        result
    }

    /// Screen a script on behalf of `actor` and audit the result.
    pub fn check_script(&self, actor: &str, script: &str) -> ScriptVerdict {
        let digest = script_digest(script);
        let reason = self.sandbox.script_block_reason(script);
        let event = match &reason {
            Some(reason) => {
                tracing::warn!(actor, %digest, reason = %reason, "Blocked script");
                AuditEvent::blocked(actor, actions::SCRIPT_EXEC, digest.clone(), reason.clone())
            }
            None => AuditEvent::allowed(actor, actions::SCRIPT_EXEC, digest.clone()),
        };
        self.audit.log_event(event);

        ScriptVerdict {
            allowed: reason.is_none(),
            reason,
            digest,
        }
    }

    /// Record a denial decided outside the filter and screener.
    pub fn record_denial(&self, actor: &str, action: &str, resource: &str, reason: &str) {
        tracing::warn!(actor, action, resource, reason, "Request denied");
        self.audit
            .log_event(AuditEvent::blocked(actor, action, bounded(resource), reason));
    }

    #[must_use]
    pub const fn url_filter(&self) -> &UrlFilter {
        &self.url_filter
    }

    #[must_use]
    pub const fn sandbox(&self) -> &ScriptSandbox {
        &self.sandbox
    }

    #[must_use]
    pub const fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }
}

fn bounded(resource: &str) -> String {
    match resource.char_indices().nth(MAX_RESOURCE_LEN) {
        Some((idx, _)) => resource[..idx].to_string(),
        None => resource.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use agent_gate_core::{AuditConfig, ManualClock};

    use super::*;
    use crate::AuditOutcome;

    fn guard() -> SecurityGuard {
        let audit = Arc::new(AuditLog::new(
            &AuditConfig::default(),
            Arc::new(ManualClock::new(0)),
        ));
        SecurityGuard::from_config(&SecurityConfig::default(), audit).unwrap()
    }

    #[test]
    fn test_blocked_url_is_audited() {
        let guard = guard();
        let result = guard.check_url("client-a", "file:///etc/passwd");
        assert!(!result.allowed);

        let events = guard.audit().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, "client-a");
        assert_eq!(events[0].action, actions::URL_FETCH);
        assert_eq!(events[0].outcome, AuditOutcome::Blocked);
        assert_eq!(events[0].reason, result.reason);
    }

    #[test]
    fn test_allowed_url_is_audited() {
        let guard = guard();
        assert!(guard.check_url("client-a", "https://example.com").allowed);

        let events = guard.audit().events();
        assert_eq!(events[0].outcome, AuditOutcome::Allowed);
        assert_eq!(events[0].resource, "https://example.com");
        assert!(events[0].reason.is_none());
    }

    #[test]
    fn test_script_audited_by_digest() {
        let guard = guard();
        let verdict = guard.check_script("client-b", "rm -rf /");
        assert!(!verdict.allowed);
        assert!(verdict.reason.is_some());
        assert!(verdict.digest.starts_with("sha256:"));
        assert_eq!(verdict.digest.len(), "sha256:".len() + 64);

        let event = &guard.audit().events()[0];
        assert_eq!(event.resource, verdict.digest);
        assert!(!event.resource.contains("rm -rf"));
    }

    #[test]
    fn test_record_denial() {
        let guard = guard();
        guard.record_denial("client-c", actions::SESSION_ACCESS, "sess-1", "Session not found");
        let event = &guard.audit().events()[0];
        assert!(event.is_blocked());
        assert_eq!(event.reason.as_deref(), Some("Session not found"));
    }

    #[test]
    fn test_long_resources_are_bounded() {
        let long = format!("https://example.com/{}", "a".repeat(5000));
        assert_eq!(bounded(&long).chars().count(), MAX_RESOURCE_LEN);
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(script_digest("1 + 2"), script_digest("1 + 2"));
        assert_ne!(script_digest("1 + 2"), script_digest("1 + 3"));
    }
}
