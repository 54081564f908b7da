//! Security layer errors.
//!
//! Denials are never errors; these cover configuration and sink failures.

use thiserror::Error;

/// Security error.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Audit sink I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Audit serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SecurityError {
    pub(crate) fn invalid_pattern(pattern: &str, source: regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        }
    }
}
