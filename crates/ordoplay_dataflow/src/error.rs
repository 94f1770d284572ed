// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for graph mutation and evaluation.

use crate::graph::GraphId;
use crate::node::NodeId;
use crate::port::Endpoint;
use crate::value::ValueKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Which part of a node schema a label was looked up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelKind {
    /// Property label
    Property,
    /// Input label
    Input,
    /// Output label
    Output,
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Property => "property",
            Self::Input => "input",
            Self::Output => "output",
        })
    }
}

/// Error raised by graph operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Label not declared by the node type, or a value it does not accept
    #[error("Schema violation on '{node_type}': {kind} '{label}' {reason}")]
    SchemaViolation {
        /// Node type tag
        node_type: String,
        /// Kind of label
        kind: LabelKind,
        /// Offending label
        label: String,
        /// What was wrong
        reason: String,
    },

    /// Input cannot accept another arc
    #[error("Input already connected: {0}")]
    CardinalityViolation(Endpoint),

    /// Output kind cannot flow into the input kind
    #[error("Incompatible kinds: {source_kind} output cannot feed {target_kind} input")]
    IncompatibleKinds {
        /// Kind produced by the source output
        source_kind: ValueKind,
        /// Kind accepted by the target input
        target_kind: ValueKind,
    },

    /// Resolution found a dependency cycle
    #[error("Cyclic dependency: {}", format_path(.0))]
    CyclicDependency(Vec<Endpoint>),

    /// Another transaction holds the graph
    #[error("Concurrent modification of graph {0}")]
    ConcurrentModification(GraphId),

    /// A production function failed
    #[error(transparent)]
    Computation(ComputationError),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Node ID already in use
    #[error("Node already exists: {0}")]
    DuplicateNode(NodeId),

    /// Node still has connections and cannot be removed
    #[error("Node still connected: {0}")]
    NodeInUse(NodeId),

    /// Node type tag not registered
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Graph not found
    #[error("Graph not found: {0}")]
    GraphNotFound(GraphId),

    /// Graph has been deleted
    #[error("Graph deleted: {0}")]
    GraphDeleted(GraphId),

    /// Arc crosses graphs without permission
    #[error("Graph {target} may not read from graph {source_graph}")]
    CrossGraphConnection {
        /// Graph owning the source node
        source_graph: GraphId,
        /// Graph owning the target node
        target: GraphId,
    },

    /// Node belongs to a different graph than the transaction
    #[error("Node {node} does not belong to graph {graph}")]
    ForeignNode {
        /// The node
        node: NodeId,
        /// The graph the transaction runs against
        graph: GraphId,
    },

    /// Nothing to undo
    #[error("Nothing to undo")]
    NothingToUndo,

    /// Nothing to redo
    #[error("Nothing to redo")]
    NothingToRedo,

    /// A history record could not be applied
    #[error("History record '{description}' could not be applied: {reason}")]
    HistoryConflict {
        /// Description of the record
        description: String,
        /// Underlying failure
        reason: Box<GraphError>,
    },
}

impl GraphError {
    /// Build a schema violation for an undeclared label
    pub fn unknown_label(node_type: &str, kind: LabelKind, label: &str) -> Self {
        Self::SchemaViolation {
            node_type: node_type.to_string(),
            kind,
            label: label.to_string(),
            reason: "is not declared".to_string(),
        }
    }

    /// Whether this error is structural (rejects the request outright)
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Computation(_))
    }
}

impl From<ComputationError> for GraphError {
    fn from(err: ComputationError) -> Self {
        Self::Computation(err)
    }
}

fn format_path(path: &[Endpoint]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Error returned by a production function
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProductionError(pub String);

impl ProductionError {
    /// Create a new production error
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Why an output failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureCause {
    /// The output's own function failed
    Failed(String),
    /// One or more arguments failed upstream
    Upstream(Vec<ComputationError>),
}

/// Per-output failure value, cached and propagated like a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationError {
    /// The failing output
    pub endpoint: Endpoint,
    /// Cause of the failure
    pub cause: FailureCause,
}

impl ComputationError {
    /// Output failed in its own function
    pub fn failed(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self {
            endpoint,
            cause: FailureCause::Failed(message.into()),
        }
    }

    /// Output failed because arguments failed
    pub fn upstream(endpoint: Endpoint, causes: Vec<ComputationError>) -> Self {
        Self {
            endpoint,
            cause: FailureCause::Upstream(causes),
        }
    }

    /// The outputs whose own functions failed, deduplicated, in discovery order
    pub fn root_causes(&self) -> Vec<&ComputationError> {
        let mut roots: Vec<&ComputationError> = Vec::new();
        let mut stack = vec![self];
        while let Some(err) = stack.pop() {
            match &err.cause {
                FailureCause::Failed(_) => {
                    if !roots.iter().any(|r| r.endpoint == err.endpoint) {
                        roots.push(err);
                    }
                }
                FailureCause::Upstream(causes) => stack.extend(causes.iter().rev()),
            }
        }
        roots
    }

    /// Message of a root failure, `None` for upstream aggregates
    pub fn message(&self) -> Option<&str> {
        match &self.cause {
            FailureCause::Failed(message) => Some(message),
            FailureCause::Upstream(_) => None,
        }
    }
}

impl fmt::Display for ComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            FailureCause::Failed(message) => write!(f, "{} failed: {message}", self.endpoint),
            FailureCause::Upstream(_) => {
                let roots = self.root_causes();
                write!(f, "{} has {} upstream failure(s): ", self.endpoint, roots.len())?;
                for (i, root) in roots.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{root}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ComputationError {}

/// Error raised while registering node types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Type tag already registered
    #[error("Node type already registered: {0}")]
    DuplicateType(String),

    /// Two declarations share a label
    #[error("Duplicate label '{label}' on node type '{node_type}'")]
    DuplicateLabel {
        /// Node type tag
        node_type: String,
        /// Duplicated label
        label: String,
    },

    /// A function argument does not name a declared label
    #[error("Argument '{argument}' of '{owner}' on node type '{node_type}' is not declared")]
    UnknownArgument {
        /// Node type tag
        node_type: String,
        /// Output or property that declared the argument
        owner: String,
        /// The argument
        argument: String,
    },

    /// Derived property defaults reference each other in a loop
    #[error("Property defaults on node type '{node_type}' form a cycle: {}", .properties.join(" -> "))]
    DefaultCycle {
        /// Node type tag
        node_type: String,
        /// Properties on the cycle
        properties: Vec<String>,
    },
}
