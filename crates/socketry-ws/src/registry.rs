//! Live connection tracking.
//!
//! The server keeps one [`ConnectionRegistry`] for all connections and each
//! endpoint keeps its own. Enumeration always returns a snapshot taken
//! under the read lock, so a broadcast never sees a connection twice or a
//! half-inserted one, and connections closing during the broadcast only
//! make their own sends fail.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionId};
use crate::error::{WsError, WsResult};
use crate::message::Message;

/// Counters describing a registry's history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Connections currently registered.
    pub active: usize,
    /// Connections ever added.
    pub accepted: u64,
    /// Connections turned away because the registry was full.
    pub rejected: u64,
    /// Connections removed.
    pub closed: u64,
}

/// A set of live connections in insertion order.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<IndexMap<ConnectionId, Arc<Connection>>>,
    max_connections: Option<usize>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    closed: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an unbounded registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding at most `max` connections.
    pub fn with_limit(max: Option<usize>) -> Self {
        Self {
            max_connections: max,
            ..Self::default()
        }
    }

    /// The configured limit, if any.
    pub fn limit(&self) -> Option<usize> {
        self.max_connections
    }

    /// Whether another connection would currently fit.
    pub fn has_capacity(&self) -> bool {
        self.max_connections
            .map_or(true, |max| self.connections.read().len() < max)
    }

    /// Count a connection that was turned away before it could be added.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Register a connection.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::ConnectionLimitReached`] if the registry is full.
    pub fn add(&self, connection: Arc<Connection>) -> WsResult<()> {
        let mut connections = self.connections.write();
        if let Some(max) = self.max_connections {
            if connections.len() >= max {
                drop(connections);
                self.record_rejected();
                warn!(max, "Connection limit reached");
                return Err(WsError::connection_limit(format!(
                    "maximum connections ({max}) reached"
                )));
            }
        }
        connections.insert(connection.id(), connection);
        let total = connections.len();
        drop(connections);

        self.accepted.fetch_add(1, Ordering::Relaxed);
        debug!(total, "Connection registered");
        Ok(())
    }

    /// Remove a connection, returning it if it was registered.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.write().shift_remove(&id);
        if removed.is_some() {
            self.closed.fetch_add(1, Ordering::Relaxed);
            debug!(connection_id = %id, "Connection deregistered");
        }
        removed
    }

    /// Look up a connection by ID.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    /// Whether a connection is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Snapshot of all registered connections, in registration order.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Queue `message` on every connection in a snapshot.
    ///
    /// Returns how many connections accepted the message.
    pub fn broadcast(&self, message: &Message) -> usize {
        self.all()
            .iter()
            .filter(|conn| conn.enqueue(message.clone(), None))
            .count()
    }

    /// Current counters.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active: self.len(),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::test_connection;
    use crate::connection::ConnectionState;
    use crate::error::CloseCode;

    #[test]
    fn test_add_get_remove() {
        let registry = ConnectionRegistry::new();
        let conn = test_connection("/echo");
        let id = conn.id();

        registry.add(Arc::clone(&conn)).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id));
        assert_eq!(registry.get(id).unwrap().id(), id);

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());

        let stats = registry.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn test_limit_rejects() {
        let registry = ConnectionRegistry::with_limit(Some(1));
        registry.add(test_connection("/a")).unwrap();
        assert!(!registry.has_capacity());

        let err = registry.add(test_connection("/b")).unwrap_err();
        assert!(matches!(err, WsError::ConnectionLimitReached(_)));
        assert_eq!(registry.stats().rejected, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_keeps_registration_order() {
        let registry = ConnectionRegistry::new();
        let conns: Vec<_> = (0..5).map(|i| test_connection(&format!("/c{i}"))).collect();
        for conn in &conns {
            registry.add(Arc::clone(conn)).unwrap();
        }
        registry.remove(conns[2].id());

        let paths: Vec<_> = registry.all().iter().map(|c| c.path().to_string()).collect();
        assert_eq!(paths, vec!["/c0", "/c1", "/c3", "/c4"]);
    }

    #[test]
    fn test_broadcast_skips_closing_connections() {
        let registry = ConnectionRegistry::new();
        let open = test_connection("/a");
        let closing = test_connection("/b");
        registry.add(Arc::clone(&open)).unwrap();
        registry.add(Arc::clone(&closing)).unwrap();

        closing.close(CloseCode::Normal, "leaving");
        assert_eq!(closing.state(), ConnectionState::Closing);

        let delivered = registry.broadcast(&Message::text("hello everyone"));
        assert_eq!(delivered, 1);
        assert_eq!(open.queued(), 1);
        assert_eq!(closing.queued(), 0);
    }

    #[test]
    fn test_concurrent_add_remove_during_broadcast() {
        let registry = Arc::new(ConnectionRegistry::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let conn = test_connection("/x");
                        let id = conn.id();
                        registry.add(conn).unwrap();
                        registry.remove(id);
                    }
                })
            })
            .collect();

        for _ in 0..100 {
            let snapshot = registry.all();
            let mut ids: Vec<_> = snapshot.iter().map(|c| c.id()).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), snapshot.len());
            registry.broadcast(&Message::text("tick"));
        }

        for writer in writers {
            writer.join().unwrap();
        }
        assert!(registry.is_empty());
        assert_eq!(registry.stats().accepted, 400);
    }

    proptest::proptest! {
        #[test]
        fn prop_registry_matches_model(
            limit in proptest::option::of(1usize..8),
            ops in proptest::collection::vec(proptest::prelude::any::<(bool, u8)>(), 0..64),
        ) {
            let registry = ConnectionRegistry::with_limit(limit);
            let mut model: Vec<Arc<Connection>> = Vec::new();
            let mut rejected = 0u64;

            for (add, pick) in ops {
                if add {
                    let conn = test_connection("/p");
                    let fits = limit.map_or(true, |max| model.len() < max);
                    proptest::prop_assert_eq!(registry.add(Arc::clone(&conn)).is_ok(), fits);
                    if fits {
                        model.push(conn);
                    } else {
                        rejected += 1;
                    }
                } else if !model.is_empty() {
                    let conn = model.remove(usize::from(pick) % model.len());
                    proptest::prop_assert!(registry.remove(conn.id()).is_some());
                }
            }

            let ids: Vec<_> = registry.all().iter().map(|c| c.id()).collect();
            let expected: Vec<_> = model.iter().map(|c| c.id()).collect();
            proptest::prop_assert_eq!(ids, expected);
            proptest::prop_assert_eq!(registry.stats().rejected, rejected);
        }
    }
}
