//! Session lifecycle for agent-gate.
//!
//! Provides:
//! - `SessionManager` - Create, access, release and expire sessions
//! - `SessionTable` - The in-memory session store
//! - `Reaper` - Periodic sweep of expired sessions

pub mod manager;
pub mod reaper;
pub mod store;

pub use manager::{LimitExceeded, SessionError, SessionManager};
pub use reaper::Reaper;
pub use store::SessionTable;
