//! Channel registry
//!
//! Binds channel names to connection ids. A channel keeps the type it was
//! first written with for the lifetime of the bag.

use crate::{BagError, ConnectionId, Result, TypeDescriptor};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A channel bound to a message type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    /// Dense id, assigned in first-use order
    pub id: ConnectionId,
    /// Channel (topic) name
    pub channel: String,
    /// Type of every message on the channel
    pub descriptor: TypeDescriptor,
}

impl Connection {
    /// Create a new connection
    pub fn new(id: ConnectionId, channel: impl Into<String>, descriptor: TypeDescriptor) -> Self {
        Self {
            id,
            channel: channel.into(),
            descriptor,
        }
    }

    /// Type name of the channel's messages
    pub fn type_name(&self) -> &str {
        &self.descriptor.type_name
    }
}

/// Outcome of [`ConnectionRegistry::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub id: ConnectionId,
    /// True if the call created the connection
    pub is_new: bool,
}

/// Channel name to connection map
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Vec<Arc<Connection>>,
    by_channel: HashMap<String, ConnectionId>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted connections
    ///
    /// Ids must be dense starting at 0 and channel names unique.
    pub fn from_connections(connections: impl IntoIterator<Item = Connection>) -> Result<Self> {
        let mut sorted: Vec<Connection> = connections.into_iter().collect();
        sorted.sort_by_key(|c| c.id);

        let mut registry = Self::new();
        for conn in sorted {
            if conn.id as usize != registry.connections.len() {
                return Err(BagError::IndexCorrupt(format!(
                    "connection ids are not dense: expected {}, found {}",
                    registry.connections.len(),
                    conn.id
                )));
            }
            if registry.by_channel.contains_key(&conn.channel) {
                return Err(BagError::IndexCorrupt(format!(
                    "channel {} has more than one connection",
                    conn.channel
                )));
            }
            registry.insert(conn);
        }
        Ok(registry)
    }

    /// Find or create the connection for `channel`
    ///
    /// Fails with `TypeConflict` if the channel already carries a different
    /// type. The registry is unchanged on failure.
    pub fn resolve(&mut self, channel: &str, descriptor: &TypeDescriptor) -> Result<Resolved> {
        if let Some(&id) = self.by_channel.get(channel) {
            let existing = &self.connections[id as usize];
            if existing.descriptor != *descriptor {
                return Err(BagError::TypeConflict {
                    channel: channel.to_string(),
                    existing: existing.descriptor.type_name.clone(),
                    requested: descriptor.type_name.clone(),
                });
            }
            return Ok(Resolved { id, is_new: false });
        }

        let id = self.connections.len() as ConnectionId;
        debug!(id, channel, type_name = %descriptor.type_name, "New connection");
        self.insert(Connection::new(id, channel, descriptor.clone()));
        Ok(Resolved { id, is_new: true })
    }

    fn insert(&mut self, conn: Connection) {
        self.by_channel.insert(conn.channel.clone(), conn.id);
        self.connections.push(Arc::new(conn));
    }

    /// All connections, in id order
    pub fn connections(&self) -> &[Arc<Connection>] {
        &self.connections
    }

    /// Get a connection by id
    pub fn get(&self, id: ConnectionId) -> Option<&Arc<Connection>> {
        self.connections.get(id as usize)
    }

    /// Get the connection bound to `channel`
    pub fn lookup(&self, channel: &str) -> Option<&Arc<Connection>> {
        self.by_channel
            .get(channel)
            .and_then(|&id| self.connections.get(id as usize))
    }

    /// Number of connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connection exists
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
