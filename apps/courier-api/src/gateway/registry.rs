//! Registry of live subscriber connections.

use std::sync::Arc;

use dashmap::DashMap;

use super::connection::Connection;

/// Shared registry of every open subscriber connection, keyed by session id.
///
/// Uses `DashMap` for shard-level concurrency: admission, watcher-driven
/// removal, and broadcast-driven removal all mutate it concurrently without
/// external locking. Presence in the map is the only signal that a session
/// is a broadcast target.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Insert a connection unconditionally. A colliding session id replaces
    /// the old entry; ids are ULIDs, so collisions are not expected.
    pub fn add(&self, session_id: String, conn: Arc<Connection>) {
        if self.connections.insert(session_id, conn).is_some() {
            tracing::warn!("session id collision, previous entry replaced");
        }
    }

    /// Remove a connection if present. Removing an absent id is a no-op, so
    /// the watcher path and the broadcast reap path stay idempotent against
    /// each other.
    pub fn remove(&self, session_id: &str) {
        self.connections.remove(session_id);
    }

    /// Point-in-time view of the registry, safe to iterate while concurrent
    /// add/remove proceed. Entries are `Arc` clones, so no shard lock is held
    /// for the duration of delivery.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.connections.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
