// SPDX-License-Identifier: MIT OR Apache-2.0
//! The workspace: process-scoped state owning every graph, the node arena,
//! the arc table and the value cache.
//!
//! ## Concurrency
//!
//! The graph store sits behind a read/write lock. Transactions, undo/redo and
//! graph lifecycle changes hold the write lock, so at most one of them runs
//! at a time and readers never observe a half-applied transaction. Reads hold
//! the read lock for the whole request and therefore see one revision of
//! every graph. Cache fills happen under the read lock and evictions under
//! the write lock, so a value is never cached against a structure that is
//! being changed.

use crate::cache::{CacheStats, OutputResult, Propagator, ValueCache};
use crate::config::WorkspaceConfig;
use crate::connection::Connection;
use crate::document::{DocumentConnection, DocumentNode, GraphDocument, DOCUMENT_FORMAT_VERSION};
use crate::error::{GraphError, Result};
use crate::evaluation::Evaluator;
use crate::graph::{GraphConfig, GraphId, GraphStore, Lifecycle, Revision};
use crate::history::{HistoryRecord, HistoryStats};
use crate::node::{NodeId, NodeRegistry};
use crate::port::Endpoint;
use crate::resolver::Resolver;
use crate::transaction::{Applied, Application, Transaction};
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};

/// Which way to walk the history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

/// Owner of every graph in the process
#[derive(Debug)]
pub struct Workspace {
    registry: NodeRegistry,
    config: WorkspaceConfig,
    store: RwLock<GraphStore>,
    cache: Mutex<ValueCache>,
}

impl Workspace {
    /// Create a workspace over a closed set of node types
    pub fn new(registry: NodeRegistry, config: WorkspaceConfig) -> Self {
        let cache = ValueCache::with_capacity(config.capacity());
        Self {
            registry,
            config,
            store: RwLock::new(GraphStore::new()),
            cache: Mutex::new(cache),
        }
    }

    /// Node type registry
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Configuration
    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Graph lifecycle
    // ------------------------------------------------------------------

    /// Create an empty graph
    pub fn create_graph(&self, config: GraphConfig) -> GraphId {
        let mut store = self.store.write();
        let name = config.name.clone();
        let id = store.add_graph(config, self.config.history_depth);
        tracing::debug!("Created graph '{}' ({})", name, id);
        id
    }

    /// Delete a graph, releasing its nodes, arcs and cache entries.
    ///
    /// Arcs from its nodes into other graphs are removed as well; those
    /// graphs advance their revision.
    pub fn delete_graph(&self, graph: GraphId) -> Result<()> {
        let mut store = self.store.write();
        let node_ids: Vec<NodeId> = store.graph(graph)?.nodes.iter().copied().collect();

        let stale = Propagator::new(&store.connections).reachable(node_ids.iter().copied());
        let mut touched_graphs = IndexSet::new();
        for node in &node_ids {
            for connection in store.connections.incident(*node) {
                if let Some(target) = store.nodes.get(&connection.target.node) {
                    if target.graph != graph {
                        touched_graphs.insert(target.graph);
                    }
                }
                store.connections.remove(connection.id);
            }
        }
        for node in &node_ids {
            store.nodes.shift_remove(node);
        }

        advance_touched(&mut store, &touched_graphs, graph);

        if let Some(state) = store.graphs.get_mut(&graph) {
            state.lifecycle = Lifecycle::Deleted;
            state.nodes.clear();
            state.readable.clear();
            if let Some(history) = state.history.as_mut() {
                history.clear();
            }
        }
        // Arcs owned by the deleted graph can no longer be replayed elsewhere
        let released: IndexSet<NodeId> = node_ids.iter().copied().collect();
        for state in store.graphs.values_mut() {
            state.readable.shift_remove(&graph);
            if let Some(history) = state.history.as_mut() {
                history.forget_connections(|c: &Connection| released.contains(&c.target.node));
            }
        }

        let mut cache = self.cache.lock();
        cache.invalidate_nodes(&stale);
        for node in &node_ids {
            cache.forget_node(*node);
        }

        tracing::debug!("Deleted graph {} with {} nodes", graph, node_ids.len());
        Ok(())
    }

    /// Allow nodes of `reader` to take inputs from outputs of `source`
    pub fn permit_reads(&self, reader: GraphId, source: GraphId) -> Result<()> {
        let mut store = self.store.write();
        store.graph(source)?;
        store.graph_mut(reader)?.readable.insert(source);
        Ok(())
    }

    /// Current revision of a graph
    pub fn revision(&self, graph: GraphId) -> Result<Revision> {
        Ok(self.store.read().graph(graph)?.revision)
    }

    /// Whether a graph exists and has not been deleted
    pub fn is_active(&self, graph: GraphId) -> bool {
        self.store.read().graph(graph).is_ok()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Apply a transaction atomically, waiting for any transaction in flight
    pub fn transact(&self, graph: GraphId, transaction: impl Into<Transaction>) -> Result<Revision> {
        let mut store = self.store.write();
        self.commit(&mut store, graph, &transaction.into())
    }

    /// Apply a transaction atomically, failing with `ConcurrentModification`
    /// instead of waiting if the workspace is busy
    pub fn try_transact(&self, graph: GraphId, transaction: impl Into<Transaction>) -> Result<Revision> {
        let mut store = self
            .store
            .try_write()
            .ok_or(GraphError::ConcurrentModification(graph))?;
        self.commit(&mut store, graph, &transaction.into())
    }

    fn commit(&self, store: &mut GraphStore, graph: GraphId, transaction: &Transaction) -> Result<Revision> {
        store.graph(graph)?;
        let applied = Application::new(store, &self.registry, graph)
            .apply_mutations(&transaction.mutations)
            .inspect_err(|err| {
                tracing::debug!("Transaction '{}' rejected: {err}", transaction.description);
            })?;

        let Applied {
            forward,
            inverse,
            stale,
            removed,
            touched,
        } = applied;
        self.evict(&stale, &removed);
        advance_touched(store, &touched, graph);

        let state = store.graph_mut(graph)?;
        state.revision += 1;
        let revision = state.revision;
        tracing::debug!(
            "Committed '{}' on graph {}: {} change(s), revision {}",
            transaction.description,
            graph,
            forward.len(),
            revision
        );
        if let Some(history) = state.history.as_mut() {
            history.commit(transaction.description.clone(), revision, forward, inverse);
        }
        Ok(revision)
    }

    fn evict(&self, stale: &IndexSet<NodeId>, removed: &[NodeId]) {
        let mut cache = self.cache.lock();
        let dropped = cache.invalidate_nodes(stale);
        for node in removed {
            cache.forget_node(*node);
        }
        tracing::trace!("Invalidated {} cached output(s) across {} node(s)", dropped, stale.len());
    }

    /// Undo the last transaction of a historied graph
    pub fn undo(&self, graph: GraphId) -> Result<Revision> {
        self.step_history(graph, Direction::Undo)
    }

    /// Redo the last undone transaction of a historied graph
    pub fn redo(&self, graph: GraphId) -> Result<Revision> {
        self.step_history(graph, Direction::Redo)
    }

    fn step_history(&self, graph: GraphId, direction: Direction) -> Result<Revision> {
        let mut store = self.store.write();
        let state = store.graph(graph)?;
        let empty = match direction {
            Direction::Undo => GraphError::NothingToUndo,
            Direction::Redo => GraphError::NothingToRedo,
        };
        let history = state.history.as_ref().ok_or_else(|| empty.clone())?;
        let record: HistoryRecord = match direction {
            Direction::Undo => history.next_undo(),
            Direction::Redo => history.next_redo(),
        }
        .cloned()
        .ok_or(empty)?;

        let changes = match direction {
            Direction::Undo => &record.inverse,
            Direction::Redo => &record.forward,
        };
        let applied = Application::new(&mut store, &self.registry, graph)
            .apply_changes(changes)
            .map_err(|err| {
                tracing::warn!(
                    "{:?} of '{}' on graph {} failed, graph left unchanged: {err}",
                    direction,
                    record.description,
                    graph
                );
                GraphError::HistoryConflict {
                    description: record.description.clone(),
                    reason: Box::new(err),
                }
            })?;
        self.evict(&applied.stale, &applied.removed);
        advance_touched(&mut store, &applied.touched, graph);

        let state = store.graph_mut(graph)?;
        state.revision += 1;
        if let Some(history) = state.history.as_mut() {
            match direction {
                Direction::Undo => history.undo()?,
                Direction::Redo => history.redo()?,
            };
        }
        tracing::debug!(
            "{:?} '{}' on graph {}, revision {}",
            direction,
            record.description,
            graph,
            state.revision
        );
        Ok(state.revision)
    }

    /// Whether the graph has something to undo
    pub fn can_undo(&self, graph: GraphId) -> bool {
        let store = self.store.read();
        store
            .graph(graph)
            .ok()
            .and_then(|s| s.history.as_ref())
            .is_some_and(|h| h.can_undo())
    }

    /// Whether the graph has something to redo
    pub fn can_redo(&self, graph: GraphId) -> bool {
        let store = self.store.read();
        store
            .graph(graph)
            .ok()
            .and_then(|s| s.history.as_ref())
            .is_some_and(|h| h.can_redo())
    }

    /// History statistics, `None` for non-historied graphs
    pub fn history_stats(&self, graph: GraphId) -> Result<Option<HistoryStats>> {
        let store = self.store.read();
        Ok(store.graph(graph)?.history.as_ref().map(|h| h.stats()))
    }

    // ------------------------------------------------------------------
    // Single-mutation conveniences
    // ------------------------------------------------------------------

    /// Create a node in its own transaction
    pub fn create_node<I, K>(&self, graph: GraphId, node_type: &str, properties: I) -> Result<NodeId>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let id = NodeId::new();
        let transaction =
            Transaction::new(format!("Create {node_type}")).create_node(id, node_type, properties);
        self.transact(graph, transaction)?;
        Ok(id)
    }

    /// Delete a node in its own transaction
    pub fn delete_node(&self, node: NodeId) -> Result<Revision> {
        let graph = self.graph_of(node)?;
        self.transact(graph, Transaction::new("Delete node").delete_node(node))
    }

    /// Set a property in its own transaction
    pub fn set_property(&self, node: NodeId, label: &str, value: impl Into<Value>) -> Result<Revision> {
        let graph = self.graph_of(node)?;
        let transaction = Transaction::new(format!("Set {label}")).set_property(node, label, value);
        self.transact(graph, transaction)
    }

    /// Connect an output to an input in the target's graph
    pub fn connect(&self, source: NodeId, output: &str, target: NodeId, input: &str) -> Result<Revision> {
        let graph = self.graph_of(target)?;
        let transaction =
            Transaction::new(format!("Connect {output} to {input}")).connect(source, output, target, input);
        self.transact(graph, transaction)
    }

    /// Disconnect an output from an input; missing arcs are ignored
    pub fn disconnect(&self, source: NodeId, output: &str, target: NodeId, input: &str) -> Result<Revision> {
        let graph = self.graph_of(target)?;
        let transaction = Transaction::new(format!("Disconnect {output} from {input}"))
            .disconnect(source, output, target, input);
        self.transact(graph, transaction)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Graph owning a node
    pub fn graph_of(&self, node: NodeId) -> Result<GraphId> {
        Ok(self.store.read().node(node)?.graph)
    }

    /// Node type tag of a node
    pub fn node_type_of(&self, node: NodeId) -> Result<String> {
        Ok(self.store.read().node(node)?.node_type.clone())
    }

    /// Effective property value (explicit or default)
    pub fn get_property(&self, node: NodeId, label: &str) -> Result<Value> {
        let store = self.store.read();
        let (node, node_type) = store.node_with_type(&self.registry, node)?;
        node.property_value(node_type, label)
    }

    /// Explicitly set property values of a node
    pub fn explicit_properties(&self, node: NodeId) -> Result<IndexMap<String, Value>> {
        Ok(self.store.read().node(node)?.properties.clone())
    }

    /// Nodes of a graph in creation order
    pub fn nodes(&self, graph: GraphId) -> Result<Vec<NodeId>> {
        let store = self.store.read();
        Ok(store.nodes_of(graph)?.iter().map(|n| n.id).collect())
    }

    /// Arcs ending in a graph, in connection order
    pub fn connections(&self, graph: GraphId) -> Result<Vec<Connection>> {
        let store = self.store.read();
        store.graph(graph)?;
        let mut connections: Vec<Connection> = store
            .connections
            .iter()
            .filter(|c| store.nodes.get(&c.target.node).is_some_and(|n| n.graph == graph))
            .cloned()
            .collect();
        connections.sort_by_key(|c| c.id);
        Ok(connections)
    }

    /// Sources feeding an input, in connection order
    pub fn sources(&self, node: NodeId, input: &str) -> Result<Vec<Endpoint>> {
        let store = self.store.read();
        store.node(node)?;
        Ok(store
            .connections
            .sources_of(&Endpoint::new(node, input))
            .into_iter()
            .map(|c| c.source.clone())
            .collect())
    }

    /// Evaluation order for an output request
    pub fn resolve(&self, node: NodeId, output: &str) -> Result<Vec<Endpoint>> {
        let store = self.store.read();
        let cache = self.cache.lock();
        Resolver::new(&store, &self.registry, &cache).resolve(&Endpoint::new(node, output))
    }

    /// Read an output: a cached result if present, else evaluate and cache.
    ///
    /// A captured computation failure is returned as
    /// [`GraphError::Computation`].
    pub fn get_or_compute(&self, node: NodeId, output: &str) -> Result<Value> {
        self.read_output(node, output)?.map_err(GraphError::Computation)
    }

    /// Run an output's production function now, reading upstream values from
    /// the cache, and store the result if the output is cacheable
    pub fn evaluate(&self, node: NodeId, output: &str) -> Result<Value> {
        let store = self.store.read();
        let result = Evaluator::new(&store, &self.registry, &self.cache)
            .evaluate(&Endpoint::new(node, output))?;
        result.map_err(GraphError::Computation)
    }

    /// Read an output, keeping structural errors and computation failures apart
    pub fn read_output(&self, node: NodeId, output: &str) -> Result<OutputResult> {
        let store = self.store.read();
        Evaluator::new(&store, &self.registry, &self.cache).get_or_compute(&Endpoint::new(node, output))
    }

    /// Read several outputs against one consistent snapshot
    pub fn read_outputs(&self, requests: &[Endpoint]) -> Result<Vec<OutputResult>> {
        let store = self.store.read();
        let mut evaluator = Evaluator::new(&store, &self.registry, &self.cache);
        requests
            .iter()
            .map(|request| evaluator.get_or_compute(request))
            .collect()
    }

    /// Evict every cached output reachable from a node
    pub fn invalidate_from(&self, node: NodeId) -> Result<usize> {
        let store = self.store.write();
        store.node(node)?;
        let stale = Propagator::new(&store.connections).reachable([node]);
        Ok(self.cache.lock().invalidate_nodes(&stale))
    }

    /// Whether an output currently has a cache entry
    pub fn is_cached(&self, node: NodeId, output: &str) -> bool {
        self.cache.lock().contains(&Endpoint::new(node, output))
    }

    /// How many times an output's production function has run
    pub fn computation_count(&self, node: NodeId, output: &str) -> u64 {
        self.cache.lock().computation_count(&Endpoint::new(node, output))
    }

    /// Cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// Persisted form of a graph
    pub fn export_graph(&self, graph: GraphId) -> Result<GraphDocument> {
        let store = self.store.read();
        let state = store.graph(graph)?;
        let nodes = store
            .nodes_of(graph)?
            .into_iter()
            .map(|node| DocumentNode {
                id: node.id,
                node_type: node.node_type.clone(),
                properties: node
                    .properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })
            .collect();

        let mut connections: Vec<&Connection> = store
            .connections
            .iter()
            .filter(|c| state.nodes.contains(&c.target.node))
            .collect();
        connections.sort_by_key(|c| c.id);

        Ok(GraphDocument {
            version: DOCUMENT_FORMAT_VERSION,
            name: state.config.name.clone(),
            historied: state.config.historied,
            volatility: state.config.volatility,
            nodes,
            connections: connections
                .into_iter()
                .map(|c| DocumentConnection {
                    source: c.source.clone(),
                    target: c.target.clone(),
                })
                .collect(),
        })
    }

    /// Create a graph from a document in a single transaction
    pub fn load_document(&self, document: &GraphDocument) -> Result<GraphId> {
        let graph = self.create_graph(document.config());
        if let Err(err) = self.transact(graph, document.to_transaction()) {
            self.delete_graph(graph)?;
            return Err(err);
        }
        // Loading is not an edit the user can undo
        if let Some(history) = self.store.write().graph_mut(graph)?.history.as_mut() {
            history.clear();
        }
        Ok(graph)
    }
}

/// Advance the revision of other graphs whose arcs `cause` changed
fn advance_touched(store: &mut GraphStore, touched: &IndexSet<GraphId>, cause: GraphId) {
    for other in touched {
        if let Ok(state) = store.graph_mut(*other) {
            state.revision += 1;
            tracing::debug!(
                "Graph {} had arcs changed by graph {}, now at revision {}",
                other,
                cause,
                state.revision
            );
        }
    }
}
