// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graphs and the store holding every graph's nodes and connections.
//!
//! Nodes of all graphs live in one arena addressed by [`NodeId`], with the
//! connection table kept separately, so arcs never own nodes and cycles in
//! the data flow cannot form ownership cycles.

use crate::connection::ConnectionTable;
use crate::error::{GraphError, Result};
use crate::history::History;
use crate::node::{Node, NodeId, NodeRegistry, NodeType};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Revision counter of a graph, advanced once per committed transaction
pub type Revision = u64;

/// Unique identifier for a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub Uuid);

impl GraphId {
    /// Create a new random graph ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How readily cached values of a graph are given up under memory pressure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Volatility {
    /// Project content, evicted last
    #[default]
    Stable,
    /// Per-session helpers
    Session,
    /// Per-view graphs disposed with their view, evicted first
    Ephemeral,
}

/// Options a graph is created with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Graph name
    pub name: String,
    /// Whether transactions are recorded for undo
    pub historied: bool,
    /// Cache eviction tier
    pub volatility: Volatility,
    /// Undo depth, `None` for the workspace default
    pub history_depth: Option<usize>,
}

impl GraphConfig {
    /// Historied, stable graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            historied: true,
            volatility: Volatility::Stable,
            history_depth: None,
        }
    }

    /// Non-historied, ephemeral graph for a view
    pub fn view(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            historied: false,
            volatility: Volatility::Ephemeral,
            history_depth: None,
        }
    }

    /// Set the volatility tier
    pub fn with_volatility(mut self, volatility: Volatility) -> Self {
        self.volatility = volatility;
        self
    }

    /// Set the undo depth
    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history_depth = Some(depth);
        self
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

/// Lifecycle of a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Accepting transactions
    Active,
    /// Terminal; everything released
    Deleted,
}

/// Book-keeping of one graph
#[derive(Debug)]
pub struct GraphState {
    /// Graph ID
    pub id: GraphId,
    /// Creation options
    pub config: GraphConfig,
    /// Current revision
    pub revision: Revision,
    /// Lifecycle state
    pub lifecycle: Lifecycle,
    /// Undo history, `None` for non-historied graphs
    pub history: Option<History>,
    /// Graphs whose nodes may feed this graph's inputs
    pub readable: IndexSet<GraphId>,
    /// Nodes owned by this graph
    pub nodes: IndexSet<NodeId>,
}

impl GraphState {
    fn new(id: GraphId, config: GraphConfig, default_depth: usize) -> Self {
        let history = config
            .historied
            .then(|| History::with_max_depth(config.history_depth.unwrap_or(default_depth)));
        Self {
            id,
            config,
            revision: 0,
            lifecycle: Lifecycle::Active,
            history,
            readable: IndexSet::new(),
            nodes: IndexSet::new(),
        }
    }

    /// Whether this graph may read outputs of nodes owned by `source`
    pub fn can_read_from(&self, source: GraphId) -> bool {
        source == self.id || self.readable.contains(&source)
    }
}

/// Every graph, node and connection of a workspace
#[derive(Debug, Default)]
pub struct GraphStore {
    /// Graphs by ID, including deleted tombstones
    pub graphs: IndexMap<GraphId, GraphState>,
    /// Node arena
    pub nodes: IndexMap<NodeId, Node>,
    /// Arc table
    pub connections: ConnectionTable,
    next_ordinal: u64,
}

impl GraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a graph
    pub fn add_graph(&mut self, config: GraphConfig, default_depth: usize) -> GraphId {
        let id = GraphId::new();
        self.graphs.insert(id, GraphState::new(id, config, default_depth));
        id
    }

    /// Get an active graph
    pub fn graph(&self, id: GraphId) -> Result<&GraphState> {
        let graph = self.graphs.get(&id).ok_or(GraphError::GraphNotFound(id))?;
        match graph.lifecycle {
            Lifecycle::Active => Ok(graph),
            Lifecycle::Deleted => Err(GraphError::GraphDeleted(id)),
        }
    }

    /// Get an active graph mutably
    pub fn graph_mut(&mut self, id: GraphId) -> Result<&mut GraphState> {
        let graph = self.graphs.get_mut(&id).ok_or(GraphError::GraphNotFound(id))?;
        match graph.lifecycle {
            Lifecycle::Active => Ok(graph),
            Lifecycle::Deleted => Err(GraphError::GraphDeleted(id)),
        }
    }

    /// Get a node by ID
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))
    }

    /// Get a node owned by `graph`
    pub fn node_in(&self, graph: GraphId, id: NodeId) -> Result<&Node> {
        let node = self.node(id)?;
        if node.graph != graph {
            return Err(GraphError::ForeignNode { node: id, graph });
        }
        Ok(node)
    }

    /// Get a node together with its type descriptor
    pub fn node_with_type<'r>(
        &self,
        registry: &'r NodeRegistry,
        id: NodeId,
    ) -> Result<(&Node, &'r NodeType)> {
        let node = self.node(id)?;
        let node_type = registry.require(&node.node_type)?;
        Ok((node, node_type))
    }

    /// Allocate a creation ordinal for a new node
    pub fn allocate_ordinal(&mut self) -> u64 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        ordinal
    }

    /// Insert a node into the arena and its graph
    pub fn insert_node(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.next_ordinal = self.next_ordinal.max(node.ordinal + 1);
        self.graph_mut(node.graph)?.nodes.insert(node.id);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Remove a node from the arena and its graph.
    ///
    /// Connections must already be gone.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self.nodes.shift_remove(&id).ok_or(GraphError::NodeNotFound(id))?;
        if let Some(graph) = self.graphs.get_mut(&node.graph) {
            graph.nodes.shift_remove(&id);
        }
        Ok(node)
    }

    /// Nodes of a graph in creation order
    pub fn nodes_of(&self, graph: GraphId) -> Result<Vec<&Node>> {
        let state = self.graph(graph)?;
        let mut nodes: Vec<&Node> = state
            .nodes
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect();
        nodes.sort_by_key(|n| n.ordinal);
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_in(graph: GraphId) -> Node {
        Node {
            id: NodeId::new(),
            graph,
            node_type: "any".to_string(),
            properties: IndexMap::new(),
            ordinal: 0,
        }
    }

    #[test]
    fn test_historied_config() {
        let mut store = GraphStore::new();
        let project = store.add_graph(GraphConfig::new("project"), 10);
        let view = store.add_graph(GraphConfig::view("outline"), 10);

        assert!(store.graph(project).unwrap().history.is_some());
        assert!(store.graph(view).unwrap().history.is_none());
        assert_eq!(store.graph(view).unwrap().config.volatility, Volatility::Ephemeral);
        assert!(Volatility::Ephemeral > Volatility::Stable);
    }

    #[test]
    fn test_node_membership() {
        let mut store = GraphStore::new();
        let a = store.add_graph(GraphConfig::new("a"), 10);
        let b = store.add_graph(GraphConfig::new("b"), 10);
        let node = node_in(a);
        let id = node.id;
        store.insert_node(node.clone()).unwrap();

        assert!(store.node_in(a, id).is_ok());
        assert_eq!(
            store.node_in(b, id).unwrap_err(),
            GraphError::ForeignNode { node: id, graph: b }
        );
        assert_eq!(store.insert_node(node).unwrap_err(), GraphError::DuplicateNode(id));

        store.remove_node(id).unwrap();
        assert!(store.graph(a).unwrap().nodes.is_empty());
    }

    #[test]
    fn test_deleted_graph_is_unreachable() {
        let mut store = GraphStore::new();
        let id = store.add_graph(GraphConfig::default(), 10);
        store.graphs.get_mut(&id).unwrap().lifecycle = Lifecycle::Deleted;
        assert_eq!(store.graph(id).unwrap_err(), GraphError::GraphDeleted(id));
        assert!(matches!(
            store.graph(GraphId::new()),
            Err(GraphError::GraphNotFound(_))
        ));
    }
}
