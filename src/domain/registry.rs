//! Concurrent store of live sessions.
//!
//! [`SessionRegistry`] keeps every registered session in a `BTreeMap`
//! behind a [`tokio::sync::RwLock`]. The lock is only ever held for the
//! map operation itself: no peer I/O happens while it is taken. Delivery
//! iterates over a [`SessionRegistry::snapshot`] instead, so a slow peer
//! write can never stall admissions or departures, and membership
//! changes during a broadcast cannot disturb the iteration.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Session, SessionId};
use crate::error::RelayError;

/// Authoritative set of registered sessions.
///
/// Holds non-owning back-references (`Arc<Session>`); removing a session
/// here never closes its transport.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a session.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateId`] if a session with the same id
    /// is already registered (unreachable with [`SessionId::next`]).
    pub async fn add(&self, session: Arc<Session>) -> Result<(), RelayError> {
        let id = session.id();
        let mut map = self.sessions.write().await;
        if map.contains_key(&id) {
            return Err(RelayError::DuplicateId(id));
        }
        map.insert(id, session);
        Ok(())
    }

    /// Unregisters a session. Removing an absent id is a no-op.
    ///
    /// Returns the removed back-reference, if any.
    pub async fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(&id)
    }

    /// Point-in-time copy of the registered sessions that are still
    /// `Active`, in admission order. Safe to iterate with no lock held.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        let map = self.sessions.read().await;
        map.values()
            .filter(|session| session.is_active())
            .map(Arc::clone)
            .collect()
    }

    /// Looks up one registered session.
    pub async fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).map(Arc::clone)
    }

    /// Returns `true` if the id is registered.
    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    /// Number of registered sessions.
    pub async fn size(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` if no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::test_support::{active_pair, session_pair, test_config};

    #[tokio::test]
    async fn add_and_size() {
        let config = test_config();
        let registry = SessionRegistry::new();
        assert!(registry.is_empty().await);

        let (a, _ca) = active_pair(&config, "alice");
        let (b, _cb) = active_pair(&config, "bob");
        assert!(registry.add(Arc::clone(&a)).await.is_ok());
        assert!(registry.add(Arc::clone(&b)).await.is_ok());

        assert_eq!(registry.size().await, 2);
        assert!(registry.contains(a.id()).await);
        assert!(registry.get(b.id()).await.is_some());
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let config = test_config();
        let registry = SessionRegistry::new();
        let (a, _ca) = active_pair(&config, "alice");

        assert!(registry.add(Arc::clone(&a)).await.is_ok());
        let result = registry.add(Arc::clone(&a)).await;
        assert!(matches!(result, Err(RelayError::DuplicateId(id)) if id == a.id()));
        assert_eq!(registry.size().await, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let config = test_config();
        let registry = SessionRegistry::new();
        let (a, _ca) = active_pair(&config, "alice");
        let (b, _cb) = active_pair(&config, "bob");
        let _ = registry.add(Arc::clone(&a)).await;
        let _ = registry.add(Arc::clone(&b)).await;

        assert!(registry.remove(a.id()).await.is_some());
        assert!(registry.remove(a.id()).await.is_none());
        assert!(registry.remove(SessionId::from_raw(u64::MAX)).await.is_none());
        assert_eq!(registry.size().await, 1);

        // Removal never touches the transport.
        assert!(a.is_active());
    }

    #[tokio::test]
    async fn size_tracks_adds_minus_effective_removes() {
        let config = test_config();
        let registry = SessionRegistry::new();
        let mut pairs = Vec::new();
        for n in 0..6 {
            pairs.push(active_pair(&config, &format!("user{n}")));
        }
        for (session, _) in &pairs {
            let _ = registry.add(Arc::clone(session)).await;
        }

        let mut expected = pairs.len();
        for (i, (session, _)) in pairs.iter().enumerate() {
            if i % 2 == 0 {
                let _ = registry.remove(session.id()).await;
                let _ = registry.remove(session.id()).await;
                expected -= 1;
            }
            assert_eq!(registry.size().await, expected);
        }
    }

    #[tokio::test]
    async fn snapshot_is_ordered_and_active_only() {
        let config = test_config();
        let registry = SessionRegistry::new();
        let (a, _ca) = active_pair(&config, "alice");
        let (b, _cb) = active_pair(&config, "bob");
        let (c, _cc) = session_pair(&config);
        let _ = registry.add(Arc::clone(&b)).await;
        let _ = registry.add(Arc::clone(&a)).await;
        let _ = registry.add(Arc::clone(&c)).await;

        let ids: Vec<_> = registry.snapshot().await.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);

        assert!(b.begin_closing());
        let ids: Vec<_> = registry.snapshot().await.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![a.id()]);
    }

    #[tokio::test]
    async fn snapshot_is_unaffected_by_later_mutation() {
        let config = test_config();
        let registry = SessionRegistry::new();
        let (a, _ca) = active_pair(&config, "alice");
        let (b, _cb) = active_pair(&config, "bob");
        let _ = registry.add(Arc::clone(&a)).await;

        let snapshot = registry.snapshot().await;
        let _ = registry.add(Arc::clone(&b)).await;
        let _ = registry.remove(a.id()).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.first().map(|s| s.id()), Some(a.id()));
    }

    #[tokio::test]
    async fn concurrent_adds_and_removes() {
        let config = test_config();
        let registry = Arc::new(SessionRegistry::new());
        let mut clients = Vec::new();
        let mut tasks = Vec::new();
        for n in 0..32 {
            let (session, client) = active_pair(&config, &format!("user{n}"));
            clients.push(client);
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let _ = registry.add(Arc::clone(&session)).await;
                let _ = registry.snapshot().await;
                if n % 4 == 0 {
                    let _ = registry.remove(session.id()).await;
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
        assert_eq!(registry.size().await, 24);
    }
}
