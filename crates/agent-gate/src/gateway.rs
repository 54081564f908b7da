//! Composition root: one entry point for every tool request.

use std::sync::Arc;

use agent_gate_core::{ConfigError, GateConfig, SharedClock};
use agent_gate_security::{AuditLog, SecurityError, SecurityGuard, audit::actions};
use agent_gate_session::{SessionError, SessionManager};
use tracing::{debug, info};

use crate::request::{DenialStage, ToolAction, ToolRequest, Verdict};

const REASON_NOT_FOUND: &str = "Session not found";
const REASON_EXPIRED: &str = "Session expired";
const REASON_NOT_OWNER: &str = "session owned by another client";

/// Gateway error.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Security error: {0}")]
    Security(#[from] SecurityError),
}

/// Session manager, screening and audit log built from one configuration.
#[derive(Debug)]
pub struct Gateway {
    config: GateConfig,
    sessions: Arc<SessionManager>,
    guard: SecurityGuard,
}

impl Gateway {
    /// Build every component without starting background work.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or a configured
    /// pattern does not compile.
    ///
    /// # Panics
    /// Panics if an audit log file is configured and this is called outside
    /// a Tokio runtime.
    pub fn new(config: GateConfig, clock: SharedClock) -> Result<Self, GateError> {
        config.validate()?;
        let sessions = Arc::new(SessionManager::new(
            config.sessions.clone(),
            Arc::clone(&clock),
        )?);
        let audit = Arc::new(AuditLog::from_config(&config.security.audit, clock));
        let guard = SecurityGuard::from_config(&config.security, audit)?;

        Ok(Self {
            config,
            sessions,
            guard,
        })
    }

    /// Build every component and start the expiry reaper.
    ///
    /// # Errors
    /// Same as [`Gateway::new`].
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn start(config: GateConfig, clock: SharedClock) -> Result<Self, GateError> {
        let gateway = Self::new(config, clock)?;
        gateway.sessions.start_reaper();
        info!("Gateway started");
        Ok(gateway)
    }

    /// Decide a tool request.
    ///
    /// Runs the session gate with its ownership check, then the URL filter
    /// or script screener. Every request leaves exactly one audit event.
    pub fn authorize(&self, request: &ToolRequest) -> Verdict {
        let actor = request.client_id.as_str();
        let access = self.sessions.access_session_as(request.session_id, actor);

        if access.forbidden {
            self.deny_session(request, REASON_NOT_OWNER);
            return Verdict::denied(DenialStage::Ownership, REASON_NOT_OWNER);
        }
        if access.session.is_none() {
            let reason = if access.expired {
                REASON_EXPIRED
            } else {
                REASON_NOT_FOUND
            };
            self.deny_session(request, reason);
            return Verdict::denied(DenialStage::Session, reason);
        }

        let verdict = match &request.action {
            ToolAction::OpenResource { url } => {
                let result = self.guard.check_url(actor, url);
                match result.reason {
                    Some(reason) if !result.allowed => Verdict::denied(DenialStage::Url, reason),
                    _ => Verdict::allowed(),
                }
            }
            ToolAction::RunScript { script } => {
                let result = self.guard.check_script(actor, script);
                match result.reason {
                    Some(reason) => Verdict::denied(DenialStage::Script, reason),
                    None => Verdict::allowed(),
                }
            }
        };
        debug!(
            session_id = %request.session_id,
            action = request.action.audit_action(),
            allowed = verdict.allowed,
            "Tool request decided"
        );
        verdict
    }

    fn deny_session(&self, request: &ToolRequest, reason: &str) {
        self.guard.record_denial(
            &request.client_id,
            actions::SESSION_ACCESS,
            &request.session_id.to_string(),
            reason,
        );
    }

    /// Stop the reaper and release every session.
    pub async fn shutdown(&self) {
        self.sessions.stop().await;
        info!("Gateway stopped");
    }

    #[must_use]
    pub const fn config(&self) -> &GateConfig {
        &self.config
    }

    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    #[must_use]
    pub const fn guard(&self) -> &SecurityGuard {
        &self.guard
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        self.guard.audit()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agent_gate_core::{ManualClock, SessionId, SessionOptions};
    use agent_gate_security::AuditOutcome;

    use super::*;

    fn gateway() -> (Gateway, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let mut config = GateConfig::default();
        config.sessions.ttl_ms = 1_000;
        let gateway = Gateway::new(config, Arc::clone(&clock) as SharedClock).unwrap();
        (gateway, clock)
    }

    #[test]
    fn test_allowed_request() {
        let (gateway, _clock) = gateway();
        let session = gateway.sessions().create_session("alice", None).unwrap();

        let verdict = gateway.authorize(&ToolRequest::open_resource(
            session.id,
            "alice",
            "https://example.com/docs",
        ));
        assert_eq!(verdict, Verdict::allowed());

        let events = gateway.audit().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, AuditOutcome::Allowed);
        assert_eq!(events[0].action, actions::URL_FETCH);
        assert_eq!(
            gateway.sessions().get_session(session.id).unwrap().access_count,
            1
        );
    }

    #[test]
    fn test_unknown_session_is_audited() {
        let (gateway, _clock) = gateway();
        let verdict = gateway.authorize(&ToolRequest::run_script(
            SessionId::new_v4(),
            "alice",
            "1 + 1",
        ));
        assert_eq!(verdict.denied_by, Some(DenialStage::Session));
        assert_eq!(verdict.reason.as_deref(), Some(REASON_NOT_FOUND));

        let events = gateway.audit().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, actions::SESSION_ACCESS);
        assert!(events[0].is_blocked());
    }

    #[test]
    fn test_expired_session_is_denied() {
        let (gateway, clock) = gateway();
        let session = gateway.sessions().create_session("alice", None).unwrap();
        clock.advance(Duration::from_millis(1_001));

        let verdict = gateway.authorize(&ToolRequest::open_resource(
            session.id,
            "alice",
            "https://example.com",
        ));
        assert_eq!(verdict.reason.as_deref(), Some(REASON_EXPIRED));
        assert_eq!(gateway.audit().len(), 1);
        assert!(!gateway.sessions().has_session(session.id));
    }

    #[test]
    fn test_foreign_session_is_denied() {
        let (gateway, _clock) = gateway();
        let session = gateway.sessions().create_session("alice", None).unwrap();

        let verdict = gateway.authorize(&ToolRequest::open_resource(
            session.id,
            "mallory",
            "https://example.com",
        ));
        assert_eq!(verdict.denied_by, Some(DenialStage::Ownership));

        let events = gateway.audit().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, "mallory");
        assert_eq!(events[0].reason.as_deref(), Some(REASON_NOT_OWNER));
    }

    #[test]
    fn test_foreign_request_leaves_session_untouched() {
        let (gateway, clock) = gateway();
        let session = gateway.sessions().create_session("alice", None).unwrap();
        clock.advance(Duration::from_millis(500));

        let verdict = gateway.authorize(&ToolRequest::run_script(session.id, "mallory", "1 + 1"));
        assert_eq!(verdict.denied_by, Some(DenialStage::Ownership));

        let stored = gateway.sessions().get_session(session.id).unwrap();
        assert_eq!(stored.access_count, 0);
        assert_eq!(stored.last_accessed_at, session.last_accessed_at);
    }

    #[test]
    fn test_shared_session_serves_other_clients() {
        let clock = Arc::new(ManualClock::new(0));
        let mut config = GateConfig::default();
        config.sessions.allow_shared_sessions = true;
        let gateway = Gateway::new(config, clock as SharedClock).unwrap();
        let session = gateway
            .sessions()
            .create_session_with("alice", SessionOptions::default().shared())
            .unwrap();

        let verdict = gateway.authorize(&ToolRequest::open_resource(
            session.id,
            "bob",
            "https://example.com",
        ));
        assert_eq!(verdict, Verdict::allowed());
        assert_eq!(
            gateway.sessions().get_session(session.id).unwrap().access_count,
            1
        );
    }

    #[test]
    fn test_blocked_url_and_script() {
        let (gateway, _clock) = gateway();
        let session = gateway.sessions().create_session("alice", None).unwrap();

        let url = gateway.authorize(&ToolRequest::open_resource(
            session.id,
            "alice",
            "javascript:alert(1)",
        ));
        assert_eq!(url.denied_by, Some(DenialStage::Url));

        let script = gateway.authorize(&ToolRequest::run_script(
            session.id,
            "alice",
            "require('child_process').exec('id')",
        ));
        assert_eq!(script.denied_by, Some(DenialStage::Script));

        let events = gateway.audit().events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.is_blocked()));
        assert_eq!(events[1].action, actions::SCRIPT_EXEC);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = GateConfig::default();
        config.sessions.max_sessions = 0;
        let err = Gateway::new(config, Arc::new(ManualClock::new(0))).unwrap_err();
        assert!(matches!(err, GateError::Config(_)));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut config = GateConfig::default();
        config.security.script.blocked_patterns = vec!["(unclosed".into()];
        let err = Gateway::new(config, Arc::new(ManualClock::new(0))).unwrap_err();
        assert!(matches!(err, GateError::Security(_)));
    }

    #[tokio::test]
    async fn test_shutdown_releases_sessions() {
        let gateway = Gateway::start(GateConfig::default(), Arc::new(ManualClock::new(0))).unwrap();
        assert!(gateway.sessions().is_reaper_running());
        let session = gateway.sessions().create_session("alice", None).unwrap();

        gateway.shutdown().await;
        assert!(!gateway.sessions().has_session(session.id));
        assert_eq!(gateway.sessions().session_stats().total_released, 1);
    }
}
