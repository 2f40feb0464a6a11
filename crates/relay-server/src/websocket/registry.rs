//! Connection registry.
//!
//! Not internally synchronized: the registry lives inside the relay's state
//! lock next to the history buffer, so joins and broadcasts observe one
//! consistent view of both.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use relay_core::{ConnectionRole, SourceGroupId};
use tokio::sync::mpsc;

use super::connection::ClientConnection;

/// Open connections keyed by id.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: BTreeMap<u64, Arc<ClientConnection>>,
    next_id: u64,
}

impl ConnectionRegistry {
    /// Create an empty registry. The first id handed out is `1`.
    pub fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Mint a fresh id and store a new connection under it. Ids are never reused.
    pub fn register(
        &mut self,
        source_address: SocketAddr,
        sender: mpsc::Sender<Arc<String>>,
    ) -> Arc<ClientConnection> {
        let id = self.next_id;
        self.next_id += 1;
        let connection = Arc::new(ClientConnection::new(id, source_address, sender));
        let _ = self.connections.insert(id, Arc::clone(&connection));
        connection
    }

    /// Find an open connection.
    pub fn lookup(&self, id: u64) -> Option<Arc<ClientConnection>> {
        self.connections.get(&id).cloned()
    }

    /// Whether `id` names an open connection.
    pub fn contains(&self, id: u64) -> bool {
        self.connections.contains_key(&id)
    }

    /// Set role and scale on an open connection. `false` if it is gone.
    pub fn update(&self, id: u64, role: ConnectionRole, source_group: SourceGroupId) -> bool {
        match self.connections.get(&id) {
            Some(connection) => {
                connection.set_registration(role, source_group);
                true
            }
            None => false,
        }
    }

    /// Remove a connection. Removing an unknown or already-removed id returns `None`.
    pub fn unregister(&mut self, id: u64) -> Option<Arc<ClientConnection>> {
        self.connections.remove(&id)
    }

    /// Snapshot of the open set, in id order.
    pub fn live_connections(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.values().cloned().collect()
    }

    /// Iterate the open set without cloning it.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ClientConnection>> {
        self.connections.values()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is open.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Remove and return every connection.
    pub fn drain(&mut self) -> Vec<Arc<ClientConnection>> {
        std::mem::take(&mut self.connections).into_values().collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
