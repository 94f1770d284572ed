// SPDX-License-Identifier: MIT OR Apache-2.0
//! Incremental dataflow engine for `OrdoPlay` Editor.
//!
//! Every editable asset and every derived view of the editor is a node in a
//! graph. Nodes declare properties, inputs and outputs; outputs are computed
//! by production functions and memoized until an edit on their dependency
//! path evicts them.
//!
//! ## Architecture
//!
//! - [`Workspace`] owns all graphs, the node arena, the arc table and the
//!   value cache
//! - Edits are [`Transaction`]s applied all-or-nothing, recorded for undo on
//!   historied graphs
//! - Reads resolve the upstream of the requested output and evaluate only
//!   what is not cached
//! - Node types are registered once in a closed [`NodeRegistry`]

pub mod cache;
pub mod config;
pub mod connection;
pub mod document;
pub mod error;
pub mod evaluation;
pub mod graph;
pub mod graphs;
pub mod history;
pub mod node;
pub mod port;
pub mod resolver;
pub mod transaction;
pub mod value;
pub mod workspace;

pub use cache::CacheStats;
pub use config::WorkspaceConfig;
pub use connection::{Connection, ConnectionId};
pub use document::GraphDocument;
pub use error::{ComputationError, GraphError, ProductionError, RegistryError, Result};
pub use evaluation::Arguments;
pub use graph::{GraphConfig, GraphId, Revision, Volatility};
pub use node::{NodeCategory, NodeId, NodeRegistry, NodeType, PROPERTIES_OUTPUT};
pub use port::{Cardinality, Endpoint, InputDecl, OutputDecl, PropertyDecl};
pub use transaction::{Mutation, Transaction};
pub use value::{Value, ValueKind};
pub use workspace::Workspace;
