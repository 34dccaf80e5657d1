//! Connection registry
//!
//! Process-wide map from charge-point id to the one live session allowed
//! per id. Rebinding an id closes the previous session (draining its
//! pending calls) before the new one becomes visible.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};

use super::session::Session;

/// Thread-safe registry of active charge-point sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

/// Shared, reference-counted session registry.
pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    /// Bind `session` to its charge-point id.
    ///
    /// Atomic evict-previous: a session already bound to the id is closed
    /// (its waiters fail with ConnectionLost) before the new one is
    /// inserted, all under the id's map entry lock. Returns the evicted
    /// session, if any.
    pub fn bind(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let id = session.charge_point_id().to_string();
        let evicted = match self.sessions.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                let old = occupied.get().clone();
                warn!(
                    charge_point_id = id.as_str(),
                    connected_since = %old.connected_at(),
                    "Evicting previous session, new connection replaces it"
                );
                old.close();
                occupied.insert(session);
                Some(old)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(session);
                None
            }
        };

        info!(charge_point_id = id.as_str(), "Charge point session bound");
        metrics::gauge!("csms_connected_chargers").set(self.sessions.len() as f64);
        evicted
    }

    /// Remove the binding for `session`'s id, but only while the id still
    /// points at this very session. A stale unbind racing a rebind (the
    /// evicted connection's cleanup) leaves the new session untouched.
    pub fn unbind(&self, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(session.charge_point_id(), |_, bound| {
                Arc::ptr_eq(bound, session)
            })
            .is_some();
        if removed {
            info!(
                charge_point_id = session.charge_point_id(),
                "Charge point session unbound"
            );
            metrics::gauge!("csms_connected_chargers").set(self.sessions.len() as f64);
        }
        removed
    }

    /// Live session for a charge point. Sweeps an entry that is observed
    /// closed, so at most one sweep happens per lookup.
    pub fn get(&self, charge_point_id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(charge_point_id)?.clone();
        if session.is_closed() {
            self.sessions
                .remove_if(charge_point_id, |_, bound| bound.is_closed());
            metrics::gauge!("csms_connected_chargers").set(self.sessions.len() as f64);
            return None;
        }
        Some(session)
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.get(charge_point_id).is_some()
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|e| !e.value().is_closed())
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Close and drop every session (graceful shutdown).
    pub fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.close();
            }
        }
        metrics::gauge!("csms_connected_chargers").set(0.0);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
