//! Trust boundary between agent tools and their callers.
//!
//! Provides:
//! - `Gateway` - Session gate, ownership check and screening in one call
//! - `ToolRequest` / `Verdict` - Request and decision types

pub mod gateway;
pub mod request;

pub use gateway::{GateError, Gateway};
pub use request::{DenialStage, ToolAction, ToolRequest, Verdict};
