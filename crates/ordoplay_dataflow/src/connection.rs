// SPDX-License-Identifier: MIT OR Apache-2.0
//! Arc table: directed connections from outputs to inputs.

use crate::node::NodeId;
use crate::port::Endpoint;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of a connection, allocated in increasing order.
///
/// Fan-in order of a multi-valued input is the order of these ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connection from a source output to a target input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Connection ID
    pub id: ConnectionId,
    /// Source node and output label
    pub source: Endpoint,
    /// Target node and input label
    pub target: Endpoint,
}

impl Connection {
    /// Check if this connection involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.source.node == node_id || self.target.node == node_id
    }
}

/// All live connections, indexed by both endpoints' nodes
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: IndexMap<ConnectionId, Connection>,
    outgoing: HashMap<NodeId, IndexSet<ConnectionId>>,
    incoming: HashMap<NodeId, IndexSet<ConnectionId>>,
    next_id: u64,
}

impl ConnectionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an ID for a new connection
    pub fn allocate_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert a connection, keeping its ID
    pub fn insert(&mut self, connection: Connection) {
        let id = connection.id;
        self.next_id = self.next_id.max(id.0 + 1);
        self.outgoing
            .entry(connection.source.node)
            .or_default()
            .insert(id);
        self.incoming
            .entry(connection.target.node)
            .or_default()
            .insert(id);
        self.connections.insert(id, connection);
    }

    /// Remove a connection
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.shift_remove(&id)?;
        if let Some(ids) = self.outgoing.get_mut(&connection.source.node) {
            ids.shift_remove(&id);
            if ids.is_empty() {
                self.outgoing.remove(&connection.source.node);
            }
        }
        if let Some(ids) = self.incoming.get_mut(&connection.target.node) {
            ids.shift_remove(&id);
            if ids.is_empty() {
                self.incoming.remove(&connection.target.node);
            }
        }
        Some(connection)
    }

    /// Get a connection by ID
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Find the connection between two endpoints
    pub fn find(&self, source: &Endpoint, target: &Endpoint) -> Option<&Connection> {
        self.incoming
            .get(&target.node)?
            .iter()
            .filter_map(|id| self.connections.get(id))
            .find(|c| c.source == *source && c.target == *target)
    }

    /// Connections feeding an input, in connection order
    pub fn sources_of(&self, target: &Endpoint) -> Vec<&Connection> {
        let mut sources: Vec<&Connection> = self
            .incoming
            .get(&target.node)
            .into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
            .filter(|c| c.target.label == target.label)
            .collect();
        sources.sort_by_key(|c| c.id);
        sources
    }

    /// Connections leaving a node
    pub fn outgoing(&self, node_id: NodeId) -> impl Iterator<Item = &Connection> {
        self.outgoing
            .get(&node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
    }

    /// Connections touching a node, in connection order
    pub fn incident(&self, node_id: NodeId) -> Vec<Connection> {
        let ids: IndexSet<ConnectionId> = self
            .incoming
            .get(&node_id)
            .into_iter()
            .chain(self.outgoing.get(&node_id))
            .flatten()
            .copied()
            .collect();
        let mut connections: Vec<Connection> = ids
            .iter()
            .filter_map(|id| self.connections.get(id).cloned())
            .collect();
        connections.sort_by_key(|c| c.id);
        connections
    }

    /// All connections in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Number of connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(table: &mut ConnectionTable, from: NodeId, to: NodeId, input: &str) -> ConnectionId {
        let id = table.allocate_id();
        table.insert(Connection {
            id,
            source: Endpoint::new(from, "out"),
            target: Endpoint::new(to, input),
        });
        id
    }

    #[test]
    fn test_sources_in_connection_order() {
        let mut table = ConnectionTable::new();
        let (a, b, c) = (NodeId::new(), NodeId::new(), NodeId::new());
        let first = connect(&mut table, a, c, "in");
        let second = connect(&mut table, b, c, "in");
        connect(&mut table, a, c, "other");

        let removed = table.remove(first).unwrap();
        table.insert(removed);

        let sources: Vec<_> = table
            .sources_of(&Endpoint::new(c, "in"))
            .iter()
            .map(|conn| conn.id)
            .collect();
        assert_eq!(sources, vec![first, second]);
    }

    #[test]
    fn test_remove_cleans_indices() {
        let mut table = ConnectionTable::new();
        let (a, b) = (NodeId::new(), NodeId::new());
        let id = connect(&mut table, a, b, "in");
        assert_eq!(table.incident(a).len(), 1);

        table.remove(id);
        assert!(table.is_empty());
        assert_eq!(table.outgoing(a).count(), 0);
        assert!(table.incident(b).is_empty());
        assert!(table.find(&Endpoint::new(a, "out"), &Endpoint::new(b, "in")).is_none());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut table = ConnectionTable::new();
        let (a, b) = (NodeId::new(), NodeId::new());
        let first = connect(&mut table, a, b, "in");
        table.remove(first);
        let second = connect(&mut table, a, b, "in");
        assert!(second > first);
    }
}
