//! # Session registry.
//!
//! Owns every live [`Session`] and the owner → session index. Both maps sit behind one
//! lock so each operation is a single atomic step:
//!
//! - `create` inserts the new session and displaces the owner's previous one;
//! - `remove` only clears the owner mapping if it still points at the removed session;
//! - `evict_idle` removes every idle session under one write acquisition.
//!
//! The registry never awaits. Terminating a removed session is the caller's job
//! (cancel its token; teardown runs on the session's own supervisor task).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::session::Session;

/// Length of generated session identifiers.
const SESSION_ID_LEN: usize = 16;

#[derive(Default)]
struct Index {
    sessions: HashMap<String, Arc<Session>>,
    owners: HashMap<String, String>,
}

/// Registry of live sessions.
pub(crate) struct SessionRegistry {
    inner: RwLock<Index>,
    runtime_token: CancellationToken,
}

impl SessionRegistry {
    /// Sessions created here get child tokens of `runtime_token`.
    pub(crate) fn new(runtime_token: CancellationToken) -> Self {
        Self {
            inner: RwLock::new(Index::default()),
            runtime_token,
        }
    }

    /// Creates a session for `owner`. Returns it and the session it displaced, if any.
    pub(crate) fn create(&self, owner: &str, phone: &str) -> (Arc<Session>, Option<Arc<Session>>) {
        let mut idx = self.inner.write();

        let id = loop {
            let candidate = random_id(SESSION_ID_LEN);
            if !idx.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Arc::new(Session::new(
            id.clone(),
            owner.to_string(),
            phone.to_string(),
            self.runtime_token.child_token(),
        ));

        let displaced = idx
            .owners
            .insert(owner.to_string(), id.clone())
            .and_then(|old| idx.sessions.remove(&old));
        idx.sessions.insert(id, Arc::clone(&session));

        (session, displaced)
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.read().sessions.get(id).cloned()
    }

    pub(crate) fn by_owner(&self, owner: &str) -> Option<Arc<Session>> {
        let idx = self.inner.read();
        idx.owners
            .get(owner)
            .and_then(|id| idx.sessions.get(id))
            .cloned()
    }

    /// Removes the session and, if it still owns it, its owner mapping.
    pub(crate) fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let mut idx = self.inner.write();
        let session = idx.sessions.remove(id)?;
        if idx.owners.get(session.owner()).is_some_and(|cur| cur == id) {
            idx.owners.remove(session.owner());
        }
        Some(session)
    }

    /// Removes `session` only if the registry still holds this exact instance.
    pub(crate) fn detach(&self, session: &Arc<Session>) -> bool {
        let mut idx = self.inner.write();
        let same = idx
            .sessions
            .get(session.id())
            .is_some_and(|cur| Arc::ptr_eq(cur, session));
        if !same {
            return false;
        }
        idx.sessions.remove(session.id());
        if idx
            .owners
            .get(session.owner())
            .is_some_and(|cur| cur == session.id())
        {
            idx.owners.remove(session.owner());
        }
        true
    }

    /// Removes every session idle for longer than `threshold` at `now`.
    pub(crate) fn evict_idle(&self, now: Instant, threshold: Duration) -> Vec<Arc<Session>> {
        let mut idx = self.inner.write();
        let idle: Vec<String> = idx
            .sessions
            .iter()
            .filter(|(_, s)| s.idle_for(now) > threshold)
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(idle.len());
        for id in idle {
            if let Some(session) = idx.sessions.remove(&id) {
                if idx.owners.get(session.owner()).is_some_and(|cur| *cur == id) {
                    idx.owners.remove(session.owner());
                }
                evicted.push(session);
            }
        }
        evicted
    }

    /// Removes and returns everything.
    pub(crate) fn drain(&self) -> Vec<Arc<Session>> {
        let mut idx = self.inner.write();
        idx.owners.clear();
        idx.sessions.drain().map(|(_, s)| s).collect()
    }

    /// All sessions, oldest first.
    pub(crate) fn list(&self) -> Vec<Arc<Session>> {
        let mut all: Vec<Arc<Session>> = self.inner.read().sessions.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        all
    }
}

/// Random alphanumeric identifier of `len` characters.
pub(crate) fn random_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
