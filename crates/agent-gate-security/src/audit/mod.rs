//! Append-only, bounded ledger of security decisions.
//!
//! Events live in a ring buffer: once `capacity` is reached, each append
//! evicts the oldest event. Sequence numbers and timestamps are assigned on
//! append, so `seq` order is insertion order.

mod sink;

use std::{collections::VecDeque, sync::Arc};

use agent_gate_core::{AuditConfig, SharedClock};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use sink::{AuditSink, JsonlFileSink};

/// Events buffered for the sink before new ones are dropped.
const SINK_QUEUE: usize = 1024;

/// Well-known action names.
pub mod actions {
    pub const URL_FETCH: &str = "url-fetch";
    pub const SCRIPT_EXEC: &str = "script-exec";
    pub const SESSION_ACCESS: &str = "session-access";
}

/// Outcome of an audited decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Allowed,
    Blocked,
}

/// Immutable record of one security decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in the log, assigned on append.
    pub seq: u64,
    /// Epoch milliseconds, assigned on append.
    pub timestamp: i64,
    /// Client or session that asked.
    pub actor: String,
    pub action: String,
    /// URL, script digest or session id.
    pub resource: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// An allowed decision.
    #[must_use]
    pub fn allowed(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            timestamp: 0,
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            outcome: AuditOutcome::Allowed,
            reason: None,
        }
    }

    /// A blocked decision.
    #[must_use]
    pub fn blocked(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            outcome: AuditOutcome::Blocked,
            reason: Some(reason.into()),
            ..Self::allowed(actor, action, resource)
        }
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.outcome == AuditOutcome::Blocked
    }
}

struct Inner {
    events: VecDeque<AuditEvent>,
    next_seq: u64,
}

/// Bounded in-memory audit log with an optional persistent sink.
pub struct AuditLog {
    capacity: usize,
    enabled: bool,
    clock: SharedClock,
    inner: RwLock<Inner>,
    sink_tx: Option<mpsc::Sender<AuditEvent>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("capacity", &self.capacity)
            .field("enabled", &self.enabled)
            .field("len", &self.len())
            .field("has_sink", &self.sink_tx.is_some())
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// In-memory log without a sink.
    #[must_use]
    pub fn new(config: &AuditConfig, clock: SharedClock) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            capacity,
            enabled: config.enabled,
            clock,
            inner: RwLock::new(Inner {
                events: VecDeque::with_capacity(capacity.min(1024)),
                next_seq: 1,
            }),
            sink_tx: None,
        }
    }

    /// Log that also forwards every event to `sink` on a background task.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn with_sink(config: &AuditConfig, clock: SharedClock, sink: Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(SINK_QUEUE);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.write(&event).await {
                    tracing::warn!(seq = event.seq, error = %e, "Failed to persist audit event");
                }
            }
            tracing::debug!("Audit sink writer stopped");
        });

        Self {
            sink_tx: Some(tx),
            ..Self::new(config, clock)
        }
    }

    /// Build from configuration, attaching a JSONL file sink when
    /// `log_path` is set.
    ///
    /// # Panics
    /// Panics if a sink is configured and this is called outside a Tokio runtime.
    #[must_use]
    pub fn from_config(config: &AuditConfig, clock: SharedClock) -> Self {
        match &config.log_path {
            Some(path) => Self::with_sink(config, clock, Arc::new(JsonlFileSink::new(path))),
            None => Self::new(config, clock),
        }
    }

    /// Append an event, evicting the oldest when full.
    ///
    /// Returns the assigned sequence number, or `None` when auditing is
    /// disabled.
    pub fn log_event(&self, mut event: AuditEvent) -> Option<u64> {
        if !self.enabled {
            return None;
        }

        // The sink is fed under the write lock so it sees events in
        // sequence order.
        let mut inner = self.inner.write();
        event.seq = inner.next_seq;
        event.timestamp = self.clock.now_ms();
        inner.next_seq += 1;
        if inner.events.len() >= self.capacity {
            inner.events.pop_front();
        }
        let seq = event.seq;
        if let Some(tx) = &self.sink_tx {
            if let Err(e) = tx.try_send(event.clone()) {
                tracing::warn!(seq, error = %e, "Audit sink queue unavailable, event not persisted");
            }
        }
        inner.events.push_back(event);
        Some(seq)
    }

    /// The most recent `count` events, oldest first.
    #[must_use]
    pub fn recent_events(&self, count: usize) -> Vec<AuditEvent> {
        let inner = self.inner.read();
        let skip = inner.events.len().saturating_sub(count);
        inner.events.iter().skip(skip).cloned().collect()
    }

    /// Every buffered event, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.read().events.iter().cloned().collect()
    }

    /// Drop every buffered event, returning how many were dropped.
    ///
    /// The persistent sink, if any, is left untouched.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut inner = self.inner.write();
            let dropped = inner.events.len();
            inner.events.clear();
            dropped
        };
        tracing::warn!(dropped, "Audit log cleared");
        dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}
