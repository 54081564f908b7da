//! Tool requests and the verdicts returned for them.

use agent_gate_core::{ClientId, SessionId};
use agent_gate_security::audit::actions;
use serde::{Deserialize, Serialize};

/// What a tool wants to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolAction {
    /// Navigate to or fetch a URL.
    OpenResource { url: String },
    /// Execute script or command text.
    RunScript { script: String },
}

impl ToolAction {
    /// Audit action name for this request.
    #[must_use]
    pub const fn audit_action(&self) -> &'static str {
        match self {
            Self::OpenResource { .. } => actions::URL_FETCH,
            Self::RunScript { .. } => actions::SCRIPT_EXEC,
        }
    }
}

/// A tool call made on behalf of a client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub session_id: SessionId,
    pub client_id: ClientId,
    pub action: ToolAction,
}

impl ToolRequest {
    #[must_use]
    pub fn open_resource(
        session_id: SessionId,
        client_id: impl Into<ClientId>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            client_id: client_id.into(),
            action: ToolAction::OpenResource { url: url.into() },
        }
    }

    #[must_use]
    pub fn run_script(
        session_id: SessionId,
        client_id: impl Into<ClientId>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            client_id: client_id.into(),
            action: ToolAction::RunScript {
                script: script.into(),
            },
        }
    }
}

/// Check that refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialStage {
    /// Unknown, released or expired session.
    Session,
    /// Session belongs to another client.
    Ownership,
    Url,
    Script,
}

/// Decision for a tool request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<DenialStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    #[must_use]
    pub const fn allowed() -> Self {
        Self {
            allowed: true,
            denied_by: None,
            reason: None,
        }
    }

    #[must_use]
    pub fn denied(stage: DenialStage, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            denied_by: Some(stage),
            reason: Some(reason.into()),
        }
    }
}
