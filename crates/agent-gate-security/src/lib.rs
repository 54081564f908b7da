//! Security enforcement for agent tool invocations.
//!
//! Provides:
//! - `UrlFilter` - Outbound resource rules
//! - `ScriptSandbox` - Static screening of script and command text
//! - `AuditLog` - Bounded ledger of every decision, with optional JSONL sink
//! - `SecurityGuard` - Runs a check and records it in one step

pub mod audit;
pub mod error;
pub mod guard;
pub mod script_sandbox;
pub mod url_filter;

pub use audit::{AuditEvent, AuditLog, AuditOutcome, AuditSink, JsonlFileSink};
pub use error::SecurityError;
pub use guard::{ScriptVerdict, SecurityGuard, script_digest};
pub use script_sandbox::{BlockedPattern, PatternCategory, ScriptSandbox};
pub use url_filter::{UrlFilter, UrlValidationResult};
