//! Session and lifecycle event types.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// Client identifier, authenticated upstream.
pub type ClientId = String;

/// Free-form session metadata.
pub type Metadata = HashMap<String, Value>;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session is live and may be accessed.
    Active,
    /// Time-to-live elapsed; the session is being or has been evicted.
    Expired,
    /// Session was released explicitly. Terminal.
    Released,
}

impl SessionState {
    /// Whether no further transition is permitted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Released)
    }
}

/// One client's bounded-lifetime interaction window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// Owning client.
    pub client_id: ClientId,
    /// Creation timestamp (epoch milliseconds).
    pub created_at: i64,
    /// Last successful access (epoch milliseconds).
    pub last_accessed_at: i64,
    /// Absolute expiry (epoch milliseconds).
    pub expires_at: i64,
    /// Number of successful accesses.
    pub access_count: u64,
    /// Current state.
    pub state: SessionState,
    /// Whether clients other than the owner may use this session.
    #[serde(default)]
    pub shared: bool,
    /// Arbitrary metadata supplied at creation.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Session {
    /// Create an active session that expires `ttl_ms` after `now`.
    #[must_use]
    pub fn new(id: SessionId, client_id: ClientId, now: i64, ttl_ms: u64, metadata: Metadata) -> Self {
        Self {
            id,
            client_id,
            created_at: now,
            last_accessed_at: now,
            expires_at: deadline(now, ttl_ms),
            access_count: 0,
            state: SessionState::Active,
            shared: false,
            metadata,
        }
    }

    /// Create a session with a fresh random id.
    #[must_use]
    pub fn generate(client_id: ClientId, now: i64, ttl_ms: u64, metadata: Metadata) -> Self {
        Self::new(Uuid::new_v4(), client_id, now, ttl_ms, metadata)
    }

    /// The single expiry predicate used by every enforcement path.
    #[must_use]
    pub const fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Whether `client_id` may use this session.
    #[must_use]
    pub fn is_usable_by(&self, client_id: &str) -> bool {
        self.shared || self.client_id == client_id
    }

    /// Milliseconds left before expiry, zero once expired.
    #[must_use]
    pub fn remaining_ms(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }

    /// Push the expiry out to `ttl_ms` after `now`.
    pub fn extend(&mut self, now: i64, ttl_ms: u64) {
        self.expires_at = deadline(now, ttl_ms);
    }

    /// Get a metadata value by key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Copy of this session with the state it has at `now`.
    #[must_use]
    pub fn observed_at(&self, now: i64) -> Self {
        let mut snapshot = self.clone();
        if snapshot.state == SessionState::Active && snapshot.is_expired_at(now) {
            snapshot.state = SessionState::Expired;
        }
        snapshot
    }
}

/// Options for a new session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub metadata: Metadata,
    /// Let any client use the session, not only its owner.
    pub shared: bool,
}

impl SessionOptions {
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }
}

fn deadline(now: i64, ttl_ms: u64) -> i64 {
    now.saturating_add(i64::try_from(ttl_ms).unwrap_or(i64::MAX))
}

/// Outcome of the session access gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAccessResult {
    /// Whether the id referred to a stored session.
    pub found: bool,
    /// Whether the session had expired and was evicted by this access.
    pub expired: bool,
    /// Whether the session belongs to another client and is not shared.
    #[serde(default)]
    pub forbidden: bool,
    /// The refreshed session, present only when access was granted.
    pub session: Option<Session>,
}

impl SessionAccessResult {
    /// Unknown or already removed id.
    #[must_use]
    pub const fn not_found() -> Self {
        Self {
            found: false,
            expired: false,
            forbidden: false,
            session: None,
        }
    }

    /// Session existed but its time-to-live had elapsed.
    #[must_use]
    pub const fn expired() -> Self {
        Self {
            found: true,
            expired: true,
            forbidden: false,
            session: None,
        }
    }

    /// Session exists but the requester may not use it.
    #[must_use]
    pub const fn forbidden() -> Self {
        Self {
            found: true,
            expired: false,
            forbidden: true,
            session: None,
        }
    }

    /// Access granted.
    #[must_use]
    pub const fn granted(session: Session) -> Self {
        Self {
            found: true,
            expired: false,
            forbidden: false,
            session: Some(session),
        }
    }

    /// Whether the caller may proceed.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        self.found && !self.expired && !self.forbidden && self.session.is_some()
    }
}

/// Kind of lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Created,
    Expired,
    Released,
}

/// Lifecycle notification published once per transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    /// Session as it was at the transition.
    pub session: Session,
    /// When the transition happened (epoch milliseconds).
    pub at: i64,
}

impl SessionEvent {
    #[must_use]
    pub const fn new(kind: SessionEventKind, session: Session, at: i64) -> Self {
        Self { kind, session, at }
    }
}

/// Aggregate view of the session store, computed on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Live sessions.
    pub active: usize,
    /// Live sessions per owning client.
    pub sessions_by_client: BTreeMap<ClientId, usize>,
    /// Live sessions marked shared.
    pub shared: usize,
    /// Stored sessions whose time-to-live elapsed but that are not evicted yet.
    pub expired_pending: usize,
    /// Sessions ever created.
    pub total_created: u64,
    /// Sessions ever released.
    pub total_released: u64,
    /// Sessions ever evicted on expiry.
    pub total_expired: u64,
}
