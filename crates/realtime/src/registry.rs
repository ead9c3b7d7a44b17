//! Directory of live connections per user.

use std::collections::HashMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use multiroom_core::{ConnectionId, UserKey};

use crate::connection::ConnectionHandle;

/// Concurrent map `UserKey -> set of live connections`.
///
/// # Invariants
/// - A key has an entry iff its connection set is non-empty.
/// - Each entry carries a lifetime token, cancelled when the entry is removed.
///
/// Mutations of one key are atomic (they run under the map's shard lock).
/// Readers get a snapshot and may miss a concurrent add or remove; delivery
/// failures caused by that are compensated by broker redelivery.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<UserKey, RegistryEntry>,
}

#[derive(Debug)]
struct RegistryEntry {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    lifetime: CancellationToken,
}

/// Result of [`ConnectionRegistry::add`].
#[derive(Debug, Clone)]
pub struct Registration {
    /// `true` when this call created the key's entry.
    pub created: bool,
    /// Cancelled when the key's connection set becomes empty.
    pub lifetime: CancellationToken,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` under `key`; idempotent for an existing pair.
    pub fn add(&self, key: &UserKey, conn: ConnectionHandle) -> Registration {
        let mut created = false;
        let mut entry = self.entries.entry(key.clone()).or_insert_with(|| {
            created = true;
            RegistryEntry {
                connections: HashMap::new(),
                lifetime: CancellationToken::new(),
            }
        });
        entry.connections.entry(conn.id()).or_insert(conn);

        debug!(user_key = %key, connections = entry.connections.len(), "connection registered");

        Registration {
            created,
            lifetime: entry.lifetime.clone(),
        }
    }

    /// Deregister a connection. Removes the key (and cancels its lifetime)
    /// once no connection is left.
    pub fn remove(&self, key: &UserKey, id: ConnectionId) -> Option<ConnectionHandle> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let removed = occupied.get_mut().connections.remove(&id);
                if occupied.get().connections.is_empty() {
                    occupied.remove().lifetime.cancel();
                    debug!(user_key = %key, "last connection gone; entry removed");
                } else if removed.is_some() {
                    debug!(
                        user_key = %key,
                        connections = occupied.get().connections.len(),
                        "connection unregistered"
                    );
                }
                removed
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Snapshot of the live connections for `key` (empty when absent).
    pub fn connections_for(&self, key: &UserKey) -> Vec<ConnectionHandle> {
        self.entries
            .get(key)
            .map(|entry| entry.connections.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &UserKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Lifetime token of a live entry.
    pub fn lifetime(&self, key: &UserKey) -> Option<CancellationToken> {
        self.entries.get(key).map(|entry| entry.lifetime.clone())
    }

    pub fn user_count(&self) -> usize {
        self.entries.len()
    }

    pub fn connection_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.connections.len()).sum()
    }
}
