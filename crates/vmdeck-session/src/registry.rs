use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::session::{session_id, Session, SessionConfig, SessionId};
use crate::transport::SessionKind;

/// Owns every live session, keyed by id.
///
/// Views never own a session; they keep the id and look it up here while
/// visible. All map mutation happens under one mutex, so concurrent
/// `get_or_create` calls for the same id always observe a single session.
/// Teardown of the removed sessions runs after the lock is released.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the live session for `id`, creating it from `config` if absent.
    ///
    /// Construction does no I/O; attaching the transport is up to the caller.
    pub fn get_or_create(&self, id: &str, config: SessionConfig) -> Arc<Session> {
        let mut sessions = self.lock();
        match sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                log::debug!("creating session {id} (generation {generation})");
                let session = Arc::new(Session::new(id.to_string(), generation, config));
                entry.insert(Arc::clone(&session));
                session
            }
        }
    }

    /// Non-creating lookup.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().get(id).cloned()
    }

    /// Dispose and remove the session for `id`. Absent ids are a no-op.
    ///
    /// Returns whether a session was removed.
    pub fn dispose(&self, id: &str) -> bool {
        let removed = self.lock().remove(id);
        match removed {
            Some(session) => {
                session.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose every session whose id starts with `prefix`.
    ///
    /// All matching entries leave the map in a single critical section, so no
    /// caller can observe a partially torn-down prefix. Returns how many
    /// sessions were disposed.
    pub fn dispose_by_prefix(&self, prefix: &str) -> usize {
        let removed: Vec<Arc<Session>> = {
            let mut sessions = self.lock();
            let ids: Vec<SessionId> = sessions
                .keys()
                .filter(|id| id.starts_with(prefix))
                .cloned()
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &removed {
            session.dispose();
        }
        if !removed.is_empty() {
            log::debug!("disposed {} session(s) with prefix {prefix:?}", removed.len());
        }
        removed.len()
    }

    /// Dispose the sessions of `subject`, one per [`SessionKind`], in a single
    /// critical section. Ids of other subjects that merely share the prefix
    /// (`web` and `web-1`) are untouched. Returns how many were disposed.
    pub fn dispose_subject(&self, subject: &str) -> usize {
        let removed: Vec<Arc<Session>> = {
            let mut sessions = self.lock();
            SessionKind::ALL
                .iter()
                .filter_map(|&kind| sessions.remove(&session_id(subject, kind)))
                .collect()
        };

        for session in &removed {
            session.dispose();
        }
        if !removed.is_empty() {
            log::debug!("disposed {} session(s) of {subject}", removed.len());
        }
        removed.len()
    }

    /// Dispose every session. Used at shutdown.
    pub fn dispose_all(&self) -> usize {
        self.dispose_by_prefix("")
    }

    /// List all session ids, sorted.
    pub fn list_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
