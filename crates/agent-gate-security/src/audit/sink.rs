//! Persistent audit sinks.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};

use super::AuditEvent;
use crate::SecurityError;

/// Destination that receives every audit event after it is buffered.
///
/// Implement this trait to ship events to your own log pipeline.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one event.
    async fn write(&self, event: &AuditEvent) -> Result<(), SecurityError>;
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonlFileSink {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl JsonlFileSink {
    /// Sink writing to `path`; the file and its parent directory are
    /// created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every well-formed event from a JSONL file.
    ///
    /// Malformed lines are skipped. A missing file reads as empty.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditEvent>, SecurityError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed audit line");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl AuditSink for JsonlFileSink {
    async fn write(&self, event: &AuditEvent) -> Result<(), SecurityError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }
        Ok(())
    }
}
