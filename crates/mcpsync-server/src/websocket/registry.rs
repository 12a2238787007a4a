//! Registry of active connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info};

use super::connection::Connection;

/// Active connections indexed by connection id.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a connection. A connection already registered under the same id
    /// is replaced and returned so the caller can close it.
    pub fn register(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let replaced = self
            .connections
            .write()
            .insert(connection.id.clone(), connection);
        if let Some(old) = &replaced {
            debug!(connection_id = %old.id, "connection replaced by reconnect");
        }
        replaced
    }

    /// Remove by id. Returns whether it existed.
    pub fn unregister(&self, connection_id: &str) -> bool {
        self.connections.write().remove(connection_id).is_some()
    }

    /// Remove `connection` only if it is still the one registered under its
    /// id, so a finished session cannot evict its replacement.
    pub fn unregister_connection(&self, connection: &Arc<Connection>) -> bool {
        let mut conns = self.connections.write();
        match conns.get(&connection.id) {
            Some(current) if Arc::ptr_eq(current, connection) => {
                let _ = conns.remove(&connection.id);
                true
            }
            _ => false,
        }
    }

    /// Record an inbound message on a connection. No-op if unknown.
    pub fn touch(&self, connection_id: &str) {
        if let Some(conn) = self.connections.read().get(connection_id) {
            conn.touch();
        }
    }

    /// Remove and return every connection idle longer than `timeout`.
    pub fn sweep(&self, timeout: Duration) -> Vec<Arc<Connection>> {
        self.sweep_at(Instant::now(), timeout)
    }

    /// [`sweep`](Self::sweep) measured at `now`.
    pub fn sweep_at(&self, now: Instant, timeout: Duration) -> Vec<Arc<Connection>> {
        let mut conns = self.connections.write();
        let stale: Vec<String> = conns
            .values()
            .filter(|c| c.idle_at(now) > timeout)
            .map(|c| c.id.clone())
            .collect();
        let removed: Vec<Arc<Connection>> =
            stale.iter().filter_map(|id| conns.remove(id)).collect();
        if !removed.is_empty() {
            info!(removed = removed.len(), "stale connections swept");
        }
        removed
    }

    /// Snapshot of every connection, safe to iterate while others register.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Connection by id.
    pub fn get(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(connection_id).cloned()
    }

    /// Number of connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
