// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transactions: atomic batches of graph mutations.
//!
//! A [`Mutation`] is validated against the node schema and expanded into
//! primitive [`Change`]s. Every applied change yields its inverse, so a
//! failing transaction is rolled back by replaying the inverses collected so
//! far, and a committed one hands both lists to the history.

use crate::cache::Propagator;
use crate::connection::Connection;
use crate::error::{GraphError, LabelKind, Result};
use crate::graph::{GraphId, GraphStore};
use crate::history::Change;
use crate::node::{Node, NodeId, NodeRegistry, NodeType};
use crate::port::{Cardinality, Endpoint};
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// A mutation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Create a node with caller-chosen ID and initial property values
    CreateNode {
        /// ID of the new node
        id: NodeId,
        /// Node type tag
        node_type: String,
        /// Initial explicit property values
        properties: IndexMap<String, Value>,
    },
    /// Delete a node and every connection touching it
    DeleteNode(NodeId),
    /// Set a property explicitly
    SetProperty {
        /// Target node
        node: NodeId,
        /// Property label
        label: String,
        /// New value
        value: Value,
    },
    /// Drop an explicit value so the default applies again
    ClearProperty {
        /// Target node
        node: NodeId,
        /// Property label
        label: String,
    },
    /// Connect an output to an input
    Connect {
        /// Source node and output
        source: Endpoint,
        /// Target node and input
        target: Endpoint,
    },
    /// Remove a connection; missing connections are ignored
    Disconnect {
        /// Source node and output
        source: Endpoint,
        /// Target node and input
        target: Endpoint,
    },
}

/// An ordered batch of mutations applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Human-readable description, shown for undo/redo
    pub description: String,
    /// Mutations in application order
    pub mutations: Vec<Mutation>,
}

impl Transaction {
    /// Create an empty transaction
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            mutations: Vec::new(),
        }
    }

    /// Append a mutation
    pub fn push(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// Create a node
    pub fn create_node<I, K>(self, id: NodeId, node_type: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.push(Mutation::CreateNode {
            id,
            node_type: node_type.into(),
            properties: properties.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        })
    }

    /// Delete a node
    pub fn delete_node(self, id: NodeId) -> Self {
        self.push(Mutation::DeleteNode(id))
    }

    /// Set a property
    pub fn set_property(self, node: NodeId, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(Mutation::SetProperty {
            node,
            label: label.into(),
            value: value.into(),
        })
    }

    /// Clear a property
    pub fn clear_property(self, node: NodeId, label: impl Into<String>) -> Self {
        self.push(Mutation::ClearProperty {
            node,
            label: label.into(),
        })
    }

    /// Connect `source.output` to `target.input`
    pub fn connect(
        self,
        source: NodeId,
        output: impl Into<String>,
        target: NodeId,
        input: impl Into<String>,
    ) -> Self {
        self.push(Mutation::Connect {
            source: Endpoint::new(source, output),
            target: Endpoint::new(target, input),
        })
    }

    /// Disconnect `source.output` from `target.input`
    pub fn disconnect(
        self,
        source: NodeId,
        output: impl Into<String>,
        target: NodeId,
        input: impl Into<String>,
    ) -> Self {
        self.push(Mutation::Disconnect {
            source: Endpoint::new(source, output),
            target: Endpoint::new(target, input),
        })
    }

    /// Whether there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

impl From<Vec<Mutation>> for Transaction {
    fn from(mutations: Vec<Mutation>) -> Self {
        Self {
            description: "Edit".to_string(),
            mutations,
        }
    }
}

/// Outcome of a successful application
#[derive(Debug, Default)]
pub(crate) struct Applied {
    /// Changes as applied
    pub forward: Vec<Change>,
    /// Inverse changes in application order
    pub inverse: Vec<Change>,
    /// Nodes whose cached outputs are stale
    pub stale: IndexSet<NodeId>,
    /// Nodes that no longer exist
    pub removed: Vec<NodeId>,
    /// Other graphs whose arcs changed
    pub touched: IndexSet<GraphId>,
}

/// In-flight application of changes to one graph
pub(crate) struct Application<'s> {
    store: &'s mut GraphStore,
    registry: &'s NodeRegistry,
    graph: GraphId,
    forward: Vec<Change>,
    inverse: Vec<Change>,
    stale: IndexSet<NodeId>,
    roots: IndexSet<NodeId>,
    touched: IndexSet<GraphId>,
}

impl<'s> Application<'s> {
    pub(crate) fn new(store: &'s mut GraphStore, registry: &'s NodeRegistry, graph: GraphId) -> Self {
        Self {
            store,
            registry,
            graph,
            forward: Vec::new(),
            inverse: Vec::new(),
            stale: IndexSet::new(),
            roots: IndexSet::new(),
            touched: IndexSet::new(),
        }
    }

    /// Apply every mutation, rolling back on the first failure
    pub(crate) fn apply_mutations(mut self, mutations: &[Mutation]) -> Result<Applied> {
        for mutation in mutations {
            if let Err(err) = self.apply_mutation(mutation) {
                self.rollback();
                return Err(err);
            }
        }
        Ok(self.finish())
    }

    /// Apply recorded changes, rolling back on the first failure
    pub(crate) fn apply_changes(mut self, changes: &[Change]) -> Result<Applied> {
        for change in changes {
            if let Err(err) = self.apply_change(change.clone()) {
                self.rollback();
                return Err(err);
            }
        }
        Ok(self.finish())
    }

    fn apply_mutation(&mut self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::CreateNode {
                id,
                node_type,
                properties,
            } => {
                self.store.graph(self.graph)?;
                let descriptor = self.registry.require(node_type)?;
                for (label, value) in properties {
                    check_property(descriptor, label, value)?;
                }
                let node = Node {
                    id: *id,
                    graph: self.graph,
                    node_type: node_type.clone(),
                    properties: properties.clone(),
                    ordinal: self.store.allocate_ordinal(),
                };
                self.apply_change(Change::InsertNode(node))
            }
            Mutation::DeleteNode(id) => {
                self.store.node_in(self.graph, *id)?;
                for connection in self.store.connections.incident(*id) {
                    self.apply_change(Change::RemoveConnection(connection.id))?;
                }
                self.apply_change(Change::RemoveNode(*id))
            }
            Mutation::SetProperty { node, label, value } => {
                let descriptor = self.node_type_in_graph(*node)?;
                check_property(descriptor, label, value)?;
                self.apply_change(Change::WriteProperty {
                    node: *node,
                    label: label.clone(),
                    value: Some(value.clone()),
                })
            }
            Mutation::ClearProperty { node, label } => {
                let descriptor = self.node_type_in_graph(*node)?;
                if descriptor.find_property(label).is_none() {
                    return Err(GraphError::unknown_label(&descriptor.id, LabelKind::Property, label));
                }
                self.apply_change(Change::WriteProperty {
                    node: *node,
                    label: label.clone(),
                    value: None,
                })
            }
            Mutation::Connect { source, target } => self.connect(source, target),
            Mutation::Disconnect { source, target } => {
                let Some(connection) = self.store.connections.find(source, target) else {
                    return Ok(());
                };
                let id = connection.id;
                self.apply_change(Change::RemoveConnection(id))
            }
        }
    }

    fn node_type_in_graph(&self, node: NodeId) -> Result<&'s NodeType> {
        let node = self.store.node_in(self.graph, node)?;
        self.registry.require(&node.node_type)
    }

    fn connect(&mut self, source: &Endpoint, target: &Endpoint) -> Result<()> {
        self.store.node_in(self.graph, target.node)?;
        let cardinality = check_arc(self.store, self.registry, source, target)?;

        if self.store.connections.find(source, target).is_some() {
            return Ok(());
        }
        check_free(self.store, target, cardinality)?;

        let connection = Connection {
            id: self.store.connections.allocate_id(),
            source: source.clone(),
            target: target.clone(),
        };
        self.apply_change(Change::InsertConnection(connection))
    }

    fn apply_change(&mut self, change: Change) -> Result<()> {
        let roots = self.affected(&change);
        self.stale
            .extend(Propagator::new(&self.store.connections).reachable(roots.iter().copied()));
        self.roots.extend(roots);

        let owner = self.arc_owner(&change);
        if let Some(inverse) = perform(self.store, self.registry, self.graph, &change)? {
            if let Some(owner) = owner.filter(|g| *g != self.graph) {
                self.touched.insert(owner);
            }
            self.forward.push(change);
            self.inverse.push(inverse);
        }
        Ok(())
    }

    /// Graph owning the arc of a connection change (the target's graph)
    fn arc_owner(&self, change: &Change) -> Option<GraphId> {
        let target = match change {
            Change::InsertConnection(connection) => connection.target.node,
            Change::RemoveConnection(id) => self.store.connections.get(*id)?.target.node,
            _ => return None,
        };
        self.store.nodes.get(&target).map(|node| node.graph)
    }

    /// Nodes whose outputs a change can affect
    fn affected(&self, change: &Change) -> Vec<NodeId> {
        match change {
            Change::InsertNode(_) => Vec::new(),
            Change::RemoveNode(id) => vec![*id],
            Change::WriteProperty { node, .. } => vec![*node],
            Change::InsertConnection(connection) => {
                vec![connection.source.node, connection.target.node]
            }
            Change::RemoveConnection(id) => self
                .store
                .connections
                .get(*id)
                .map(|c| vec![c.source.node, c.target.node])
                .unwrap_or_default(),
        }
    }

    fn rollback(self) {
        for change in self.inverse.iter().rev() {
            if let Err(err) = perform(self.store, self.registry, self.graph, change) {
                tracing::error!("Rollback of graph {} failed: {err}", self.graph);
            }
        }
    }

    fn finish(mut self) -> Applied {
        let reached = Propagator::new(&self.store.connections).reachable(self.roots.iter().copied());
        self.stale.extend(reached);

        let removed = self
            .forward
            .iter()
            .filter_map(|c| match c {
                Change::RemoveNode(id) => Some(*id),
                _ => None,
            })
            .collect();

        self.inverse.reverse();
        Applied {
            forward: self.forward,
            inverse: self.inverse,
            stale: self.stale,
            removed,
            touched: self.touched,
        }
    }
}

/// Check that `source` may feed `target`, returning the input's cardinality
fn check_arc(
    store: &GraphStore,
    registry: &NodeRegistry,
    source: &Endpoint,
    target: &Endpoint,
) -> Result<Cardinality> {
    let target_node = store.node(target.node)?;
    let target_type = registry.require(&target_node.node_type)?;
    let input = target_type
        .find_input(&target.label)
        .ok_or_else(|| GraphError::unknown_label(&target_type.id, LabelKind::Input, &target.label))?;

    let source_node = store.node(source.node)?;
    if !store.graph(target_node.graph)?.can_read_from(source_node.graph) {
        return Err(GraphError::CrossGraphConnection {
            source_graph: source_node.graph,
            target: target_node.graph,
        });
    }
    let source_type = registry.require(&source_node.node_type)?;
    let output = source_type
        .find_output(&source.label)
        .ok_or_else(|| GraphError::unknown_label(&source_type.id, LabelKind::Output, &source.label))?;

    if !output.kind.can_connect_to(input.kind) {
        return Err(GraphError::IncompatibleKinds {
            source_kind: output.kind,
            target_kind: input.kind,
        });
    }
    Ok(input.cardinality)
}

/// A single-valued input takes no second arc
fn check_free(store: &GraphStore, target: &Endpoint, cardinality: Cardinality) -> Result<()> {
    if cardinality == Cardinality::Single && !store.connections.sources_of(target).is_empty() {
        return Err(GraphError::CardinalityViolation(target.clone()));
    }
    Ok(())
}

fn check_property(node_type: &NodeType, label: &str, value: &Value) -> Result<()> {
    let decl = node_type
        .find_property(label)
        .ok_or_else(|| GraphError::unknown_label(&node_type.id, LabelKind::Property, label))?;
    if !decl.kind.accepts(value) {
        return Err(GraphError::SchemaViolation {
            node_type: node_type.id.clone(),
            kind: LabelKind::Property,
            label: label.to_string(),
            reason: format!("expects {}, got {}", decl.kind, value.kind_name()),
        });
    }
    Ok(())
}

/// Apply one primitive change, returning its inverse (`None` if it was a no-op)
fn perform(
    store: &mut GraphStore,
    registry: &NodeRegistry,
    graph: GraphId,
    change: &Change,
) -> Result<Option<Change>> {
    match change {
        Change::InsertNode(node) => {
            if node.graph != graph {
                return Err(GraphError::ForeignNode { node: node.id, graph });
            }
            store.insert_node(node.clone())?;
            Ok(Some(Change::RemoveNode(node.id)))
        }
        Change::RemoveNode(id) => {
            store.node_in(graph, *id)?;
            if !store.connections.incident(*id).is_empty() {
                return Err(GraphError::NodeInUse(*id));
            }
            let node = store.remove_node(*id)?;
            Ok(Some(Change::InsertNode(node)))
        }
        Change::WriteProperty { node, label, value } => {
            store.node_in(graph, *node)?;
            let target = store
                .nodes
                .get_mut(node)
                .ok_or(GraphError::NodeNotFound(*node))?;
            let previous = match value {
                Some(value) => target.properties.insert(label.clone(), value.clone()),
                None => target.properties.shift_remove(label),
            };
            Ok(Some(Change::WriteProperty {
                node: *node,
                label: label.clone(),
                value: previous,
            }))
        }
        Change::InsertConnection(connection) => {
            let source = store.node(connection.source.node)?;
            let target = store.node(connection.target.node)?;
            if source.graph != graph && target.graph != graph {
                return Err(GraphError::ForeignNode {
                    node: connection.target.node,
                    graph,
                });
            }
            if store.connections.get(connection.id).is_some() {
                return Ok(None);
            }
            // Replayed arcs pass the same checks as new ones
            let cardinality = check_arc(store, registry, &connection.source, &connection.target)?;
            if store.connections.find(&connection.source, &connection.target).is_some() {
                return Ok(None);
            }
            check_free(store, &connection.target, cardinality)?;
            store.connections.insert(connection.clone());
            Ok(Some(Change::RemoveConnection(connection.id)))
        }
        Change::RemoveConnection(id) => {
            let Some(connection) = store.connections.get(*id) else {
                return Ok(None);
            };
            let touches_graph = [connection.source.node, connection.target.node]
                .iter()
                .any(|n| store.nodes.get(n).is_some_and(|node| node.graph == graph));
            if !touches_graph {
                return Err(GraphError::ForeignNode {
                    node: connection.target.node,
                    graph,
                });
            }
            let removed = store.connections.remove(*id);
            Ok(removed.map(Change::InsertConnection))
        }
    }
}
