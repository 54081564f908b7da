//! Core abstractions for the agent-gate trust boundary.
//!
//! This crate provides the fundamental building blocks:
//! - `Clock` - Shared time source for every expiry decision
//! - `GateConfig` - Immutable startup configuration
//! - `Session` / `SessionEvent` - Lifecycle value types
//! - `EventBus` - Bounded, non-blocking notification fan-out

pub mod clock;
pub mod config;
pub mod event_bus;
pub mod session;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    AuditConfig, ConfigError, GateConfig, ScriptSandboxConfig, SecurityConfig,
    SessionManagerConfig, UrlFilterConfig,
};
pub use event_bus::{EventBus, Subscription};
pub use session::{
    ClientId, Metadata, Session, SessionAccessResult, SessionEvent, SessionEventKind, SessionId,
    SessionOptions, SessionState, SessionStats,
};
