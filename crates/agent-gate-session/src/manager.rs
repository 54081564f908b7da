//! Session manager: the lifecycle API over the session table.

use std::sync::Arc;

use agent_gate_core::{
    ClientId, ConfigError, EventBus, Metadata, Session, SessionAccessResult, SessionEvent,
    SessionEventKind, SessionId, SessionManagerConfig, SessionOptions, SessionState, SessionStats,
    SharedClock, Subscription, SystemClock,
};
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{reaper::Reaper, store::SessionTable};

/// Which concurrency limit a create request hit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitExceeded {
    #[error("Maximum concurrent sessions ({limit}) reached")]
    Global { limit: usize },
    #[error("Client {client_id} has reached the maximum of {limit} sessions")]
    Client { client_id: ClientId, limit: usize },
}

impl LimitExceeded {
    #[must_use]
    pub const fn limit(&self) -> usize {
        match self {
            Self::Global { limit } | Self::Client { limit, .. } => *limit,
        }
    }
}

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(LimitExceeded),
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("Shared sessions are not allowed by configuration")]
    SharedNotAllowed,
    #[error("Session manager stopped")]
    Stopped,
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Owns every session and enforces the lifecycle rules.
///
/// All reads and mutations go through one lock, so each operation is
/// atomic with respect to the others. Lifecycle events are published to a
/// broadcast bus; listeners run on their own tasks and never under the lock.
pub struct SessionManager {
    config: SessionManagerConfig,
    clock: SharedClock,
    table: Mutex<SessionTable>,
    events: EventBus<SessionEvent>,
    reaper: Mutex<Option<Reaper>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("sessions", &self.table.lock().len())
            .field("reaper_running", &self.is_reaper_running())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Build a manager without starting the reaper.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid.
    pub fn new(config: SessionManagerConfig, clock: SharedClock) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            table: Mutex::new(SessionTable::new()),
            events: EventBus::new(),
            reaper: Mutex::new(None),
        })
    }

    /// Build a manager on the system clock and start its reaper.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn initialize(config: SessionManagerConfig) -> Result<Arc<Self>, SessionError> {
        Self::initialize_with_clock(config, SystemClock::shared())
    }

    /// Build a manager on `clock` and start its reaper.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn initialize_with_clock(
        config: SessionManagerConfig,
        clock: SharedClock,
    ) -> Result<Arc<Self>, SessionError> {
        let manager = Arc::new(Self::new(config, clock)?);
        manager.start_reaper();
        Ok(manager)
    }

    /// Start the periodic sweep. Does nothing if it is already running.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn start_reaper(self: &Arc<Self>) {
        let mut slot = self.reaper.lock();
        if slot.as_ref().is_some_and(Reaper::is_running) {
            return;
        }
        *slot = Some(Reaper::spawn(
            Arc::downgrade(self),
            self.config.cleanup_interval(),
        ));
        info!(
            max_sessions = self.config.max_sessions,
            ttl_ms = self.config.ttl_ms,
            cleanup_interval_ms = self.config.cleanup_interval_ms,
            "Session manager started"
        );
    }

    #[must_use]
    pub fn is_reaper_running(&self) -> bool {
        self.reaper.lock().as_ref().is_some_and(Reaper::is_running)
    }

    /// Create a session for `client_id`.
    ///
    /// Expired sessions are evicted before a limit is enforced, so they
    /// never hold a slot.
    ///
    /// # Errors
    /// Returns `ResourceExhausted` if the global or per-client limit is
    /// reached, or `Stopped` after `stop`.
    pub fn create_session(
        &self,
        client_id: impl Into<ClientId>,
        metadata: Option<Metadata>,
    ) -> Result<Session, SessionError> {
        self.create_session_with(
            client_id,
            SessionOptions::default().with_metadata(metadata.unwrap_or_default()),
        )
    }

    /// Create a session for `client_id` with explicit options.
    ///
    /// # Errors
    /// Same as [`SessionManager::create_session`], plus `SharedNotAllowed`
    /// when a shared session is requested but disabled.
    pub fn create_session_with(
        &self,
        client_id: impl Into<ClientId>,
        options: SessionOptions,
    ) -> Result<Session, SessionError> {
        let client_id = client_id.into();
        if options.shared && !self.config.allow_shared_sessions {
            warn!(client_id = %client_id, "Shared session refused");
            return Err(SessionError::SharedNotAllowed);
        }

        let mut table = self.table.lock();
        let now = self.clock.now_ms();
        if table.is_closed() {
            return Err(SessionError::Stopped);
        }

        if self.at_limit(&table, &client_id) {
            for session in table.evict_expired(now) {
                self.emit(SessionEventKind::Expired, session, now);
            }
        }

        if table.len() >= self.config.max_sessions {
            warn!(client_id = %client_id, limit = self.config.max_sessions, "Session limit reached");
            return Err(SessionError::ResourceExhausted(LimitExceeded::Global {
                limit: self.config.max_sessions,
            }));
        }
        if table.client_len(&client_id) >= self.config.per_client_session_limit {
            warn!(
                client_id = %client_id,
                limit = self.config.per_client_session_limit,
                "Per-client session limit reached"
            );
            return Err(SessionError::ResourceExhausted(LimitExceeded::Client {
                client_id,
                limit: self.config.per_client_session_limit,
            }));
        }

        let mut session = Session::generate(client_id, now, self.config.ttl_ms, options.metadata);
        session.shared = options.shared;
        table.insert(session.clone());
        self.emit(SessionEventKind::Created, session.clone(), now);
        debug!(session_id = %session.id, client_id = %session.client_id, "Session created");
        Ok(session)
    }

    fn at_limit(&self, table: &SessionTable, client_id: &str) -> bool {
        table.len() >= self.config.max_sessions
            || table.client_len(client_id) >= self.config.per_client_session_limit
    }

    /// Look up a live session without counting an access.
    #[must_use]
    pub fn get_session(&self, id: SessionId) -> Option<Session> {
        let table = self.table.lock();
        let now = self.clock.now_ms();
        table.get(&id).filter(|s| !s.is_expired_at(now)).cloned()
    }

    /// The access gate.
    ///
    /// Grants access to a live session, bumping its access count. A session
    /// found past its expiry is evicted on the spot.
    pub fn access_session(&self, id: SessionId) -> SessionAccessResult {
        self.access(id, None)
    }

    /// The access gate on behalf of `client_id`.
    ///
    /// Like [`SessionManager::access_session`], but a session owned by
    /// another client and not shared is refused without being touched.
    pub fn access_session_as(&self, id: SessionId, client_id: &str) -> SessionAccessResult {
        self.access(id, Some(client_id))
    }

    fn access(&self, id: SessionId, requester: Option<&str>) -> SessionAccessResult {
        let mut table = self.table.lock();
        let now = self.clock.now_ms();

        let expired = match table.get(&id) {
            Some(session) => session.is_expired_at(now),
            None => return SessionAccessResult::not_found(),
        };

        if expired {
            if let Some(session) = table.remove(&id, SessionState::Expired) {
                self.emit(SessionEventKind::Expired, session, now);
            }
            debug!(session_id = %id, "Session expired on access");
            return SessionAccessResult::expired();
        }

        let Some(session) = table.get_mut(&id) else {
            return SessionAccessResult::not_found();
        };
        if requester.is_some_and(|client_id| !session.is_usable_by(client_id)) {
            debug!(session_id = %id, client_id = requester, "Session access refused");
            return SessionAccessResult::forbidden();
        }
        session.last_accessed_at = now;
        session.access_count += 1;
        SessionAccessResult::granted(session.clone())
    }

    /// Reset a live session's expiry to a full TTL from now.
    ///
    /// # Errors
    /// Returns `NotFound` if the session is unknown, released or expired.
    pub fn extend_session(&self, id: SessionId) -> Result<Session, SessionError> {
        let mut table = self.table.lock();
        let now = self.clock.now_ms();

        match table.get(&id).map(|s| s.is_expired_at(now)) {
            None => Err(SessionError::NotFound(id)),
            Some(true) => {
                if let Some(session) = table.remove(&id, SessionState::Expired) {
                    self.emit(SessionEventKind::Expired, session, now);
                }
                Err(SessionError::NotFound(id))
            }
            Some(false) => {
                let session = table.get_mut(&id).ok_or(SessionError::NotFound(id))?;
                session.extend(now, self.config.ttl_ms);
                debug!(session_id = %id, expires_at = session.expires_at, "Session extended");
                Ok(session.clone())
            }
        }
    }

    /// Release a session. Returns `false` if it was not stored.
    pub fn release_session(&self, id: SessionId) -> bool {
        let mut table = self.table.lock();
        let now = self.clock.now_ms();
        match table.remove(&id, SessionState::Released) {
            Some(session) => {
                self.emit(SessionEventKind::Released, session, now);
                debug!(session_id = %id, "Session released");
                true
            }
            None => false,
        }
    }

    /// Release every session owned by `client_id`, returning how many.
    pub fn release_client_sessions(&self, client_id: &str) -> usize {
        let mut table = self.table.lock();
        let now = self.clock.now_ms();
        let released = table.remove_client(client_id);
        let count = released.len();
        for session in released {
            self.emit(SessionEventKind::Released, session, now);
        }
        if count > 0 {
            debug!(client_id, count, "Client sessions released");
        }
        count
    }

    /// Evict every expired session, returning how many.
    pub fn cleanup_expired_sessions(&self) -> usize {
        let mut table = self.table.lock();
        let now = self.clock.now_ms();
        let evicted = table.evict_expired(now);
        let count = evicted.len();
        for session in evicted {
            self.emit(SessionEventKind::Expired, session, now);
        }
        drop(table);

        if count > 0 {
            info!(count, "Expired sessions cleaned up");
        }
        count
    }

    #[must_use]
    pub fn session_stats(&self) -> SessionStats {
        let table = self.table.lock();
        table.stats(self.clock.now_ms())
    }

    /// Every stored session, including expired ones not yet evicted.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<Session> {
        let table = self.table.lock();
        table.snapshot(self.clock.now_ms())
    }

    #[must_use]
    pub fn has_session(&self, id: SessionId) -> bool {
        let table = self.table.lock();
        let now = self.clock.now_ms();
        table.get(&id).is_some_and(|s| !s.is_expired_at(now))
    }

    /// Live sessions owned by `client_id`.
    #[must_use]
    pub fn client_session_count(&self, client_id: &str) -> usize {
        let table = self.table.lock();
        table.live_client_count(client_id, self.clock.now_ms())
    }

    /// Register a lifecycle listener.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn on_session_event<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    /// Lifecycle events as a stream, starting now.
    #[must_use]
    pub fn event_stream(&self) -> BoxStream<'static, SessionEvent> {
        self.events.stream()
    }

    /// Stop the reaper, then release every remaining session.
    ///
    /// Later `create_session` calls fail with `Stopped`. Calling this more
    /// than once is harmless.
    pub async fn stop(&self) {
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.shutdown().await;
        }

        let mut table = self.table.lock();
        let now = self.clock.now_ms();
        let released = table.close();
        let count = released.len();
        for session in released {
            self.emit(SessionEventKind::Released, session, now);
        }
        drop(table);

        info!(released = count, "Session manager stopped");
    }

    #[must_use]
    pub const fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    #[must_use]
    pub const fn clock(&self) -> &SharedClock {
        &self.clock
    }

    // Called with the table lock held so events follow transition order.
    fn emit(&self, kind: SessionEventKind, session: Session, at: i64) {
        self.events.publish(SessionEvent::new(kind, session, at));
    }
}
