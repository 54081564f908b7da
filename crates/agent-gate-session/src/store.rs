//! Session table.
//!
//! Plain data structure with a per-client index. It has no locking of its
//! own: `SessionManager` owns it behind a single mutex, which is what makes
//! every read-modify-write sequence atomic.

use std::collections::{BTreeMap, HashMap, HashSet};

use agent_gate_core::{ClientId, Session, SessionId, SessionState, SessionStats};

/// In-memory session collection.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, Session>,
    by_client: HashMap<ClientId, HashSet<SessionId>>,
    total_created: u64,
    total_released: u64,
    total_expired: u64,
    closed: bool,
}

impl SessionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a newly created session.
    pub fn insert(&mut self, session: Session) {
        self.by_client
            .entry(session.client_id.clone())
            .or_default()
            .insert(session.id);
        self.sessions.insert(session.id, session);
        self.total_created += 1;
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Remove a session, moving it to `final_state`.
    pub fn remove(&mut self, id: &SessionId, final_state: SessionState) -> Option<Session> {
        let mut session = self.sessions.remove(id)?;
        if let Some(ids) = self.by_client.get_mut(&session.client_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_client.remove(&session.client_id);
            }
        }

        session.state = final_state;
        match final_state {
            SessionState::Released => self.total_released += 1,
            SessionState::Expired => self.total_expired += 1,
            SessionState::Active => {}
        }
        Some(session)
    }

    /// Release every session owned by `client_id`.
    pub fn remove_client(&mut self, client_id: &str) -> Vec<Session> {
        let Some(ids) = self.by_client.remove(client_id) else {
            return Vec::new();
        };

        let mut released: Vec<Session> = ids
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .map(|mut session| {
                session.state = SessionState::Released;
                session
            })
            .collect();
        released.sort_by_key(|s| s.created_at);
        self.total_released += released.len() as u64;
        released
    }

    /// Evict every session expired at `now`.
    pub fn evict_expired(&mut self, now: i64) -> Vec<Session> {
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.is_expired_at(now))
            .map(|s| s.id)
            .collect();

        expired
            .iter()
            .filter_map(|id| self.remove(id, SessionState::Expired))
            .collect()
    }

    /// Release everything and refuse further inserts.
    pub fn close(&mut self) -> Vec<Session> {
        self.closed = true;
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.iter()
            .filter_map(|id| self.remove(id, SessionState::Released))
            .collect()
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stored sessions, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stored sessions owned by `client_id`, including expired ones.
    #[must_use]
    pub fn client_len(&self, client_id: &str) -> usize {
        self.by_client.get(client_id).map_or(0, HashSet::len)
    }

    /// Live sessions owned by `client_id` at `now`.
    #[must_use]
    pub fn live_client_count(&self, client_id: &str, now: i64) -> usize {
        self.by_client.get(client_id).map_or(0, |ids| {
            ids.iter()
                .filter_map(|id| self.sessions.get(id))
                .filter(|s| !s.is_expired_at(now))
                .count()
        })
    }

    #[must_use]
    pub fn stats(&self, now: i64) -> SessionStats {
        let mut sessions_by_client = BTreeMap::new();
        let mut shared = 0;
        let mut expired_pending = 0;
        for session in self.sessions.values() {
            if session.is_expired_at(now) {
                expired_pending += 1;
                continue;
            }
            *sessions_by_client
                .entry(session.client_id.clone())
                .or_insert(0) += 1;
            if session.shared {
                shared += 1;
            }
        }

        SessionStats {
            active: self.sessions.len() - expired_pending,
            sessions_by_client,
            shared,
            expired_pending,
            total_created: self.total_created,
            total_released: self.total_released,
            total_expired: self.total_expired,
        }
    }

    /// Copy of every stored session as observed at `now`, oldest first.
    #[must_use]
    pub fn snapshot(&self, now: i64) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .values()
            .map(|s| s.observed_at(now))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }
}

#[cfg(test)]
mod tests {
    use agent_gate_core::Metadata;

    use super::*;

    fn session(client: &str, now: i64, ttl: u64) -> Session {
        Session::generate(client.into(), now, ttl, Metadata::new())
    }

    #[test]
    fn test_insert_indexes_by_client() {
        let mut table = SessionTable::new();
        table.insert(session("a", 0, 10));
        table.insert(session("a", 0, 10));
        table.insert(session("b", 0, 10));

        assert_eq!(table.len(), 3);
        assert_eq!(table.client_len("a"), 2);
        assert_eq!(table.client_len("b"), 1);
        assert_eq!(table.client_len("c"), 0);
    }

    #[test]
    fn test_remove_updates_index_and_counters() {
        let mut table = SessionTable::new();
        let s = session("a", 0, 10);
        let id = s.id;
        table.insert(s);

        let removed = table.remove(&id, SessionState::Released).unwrap();
        assert_eq!(removed.state, SessionState::Released);
        assert!(table.remove(&id, SessionState::Released).is_none());
        assert_eq!(table.client_len("a"), 0);
        assert_eq!(table.stats(0).total_released, 1);
    }

    #[test]
    fn test_evict_expired_only_takes_expired() {
        let mut table = SessionTable::new();
        table.insert(session("a", 0, 10));
        table.insert(session("a", 0, 100));

        assert!(table.evict_expired(10).is_empty());
        let evicted = table.evict_expired(11);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].state, SessionState::Expired);
        assert_eq!(table.len(), 1);
        assert_eq!(table.stats(11).total_expired, 1);
    }

    #[test]
    fn test_stats_and_counts_split_expired() {
        let mut table = SessionTable::new();
        table.insert(session("a", 0, 10));
        table.insert(session("a", 0, 100));

        let stats = table.stats(50);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.expired_pending, 1);
        assert_eq!(stats.total_created, 2);
        assert_eq!(table.live_client_count("a", 50), 1);
        assert_eq!(table.client_len("a"), 2);
    }

    #[test]
    fn test_stats_break_down_by_client() {
        let mut table = SessionTable::new();
        table.insert(session("a", 0, 100));
        table.insert(session("a", 0, 100));
        let mut shared = session("b", 0, 100);
        shared.shared = true;
        table.insert(shared);
        table.insert(session("c", 0, 10));

        let stats = table.stats(50);
        assert_eq!(stats.sessions_by_client.get("a"), Some(&2));
        assert_eq!(stats.sessions_by_client.get("b"), Some(&1));
        // Expired sessions are not counted against their client.
        assert_eq!(stats.sessions_by_client.get("c"), None);
        assert_eq!(stats.shared, 1);
    }

    #[test]
    fn test_remove_client() {
        let mut table = SessionTable::new();
        table.insert(session("a", 0, 10));
        table.insert(session("a", 1, 10));
        table.insert(session("b", 0, 10));

        let released = table.remove_client("a");
        assert_eq!(released.len(), 2);
        assert!(released.iter().all(|s| s.state == SessionState::Released));
        assert_eq!(table.len(), 1);
        assert!(table.remove_client("a").is_empty());
    }

    #[test]
    fn test_close_releases_everything() {
        let mut table = SessionTable::new();
        table.insert(session("a", 0, 10));
        table.insert(session("b", 0, 10));

        assert_eq!(table.close().len(), 2);
        assert!(table.is_closed());
        assert!(table.is_empty());
    }

    #[test]
    fn test_snapshot_marks_expired() {
        let mut table = SessionTable::new();
        table.insert(session("a", 0, 10));
        let snapshot = table.snapshot(20);
        assert_eq!(snapshot[0].state, SessionState::Expired);
        // The stored record is untouched.
        assert_eq!(table.snapshot(5)[0].state, SessionState::Active);
    }
}
