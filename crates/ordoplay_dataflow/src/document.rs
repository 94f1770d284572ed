// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted form of a graph: nodes, explicit property values and arcs.

use crate::graph::{GraphConfig, Volatility};
use crate::node::NodeId;
use crate::port::Endpoint;
use crate::transaction::Transaction;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Current document format version
pub const DOCUMENT_FORMAT_VERSION: u32 = 1;

/// A node as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentNode {
    /// Node ID
    pub id: NodeId,
    /// Node type tag
    pub node_type: String,
    /// Explicitly set properties
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// An arc as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentConnection {
    /// Source node and output
    pub source: Endpoint,
    /// Target node and input
    pub target: Endpoint,
}

/// Observable contents of one graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Format version
    pub version: u32,
    /// Graph name
    pub name: String,
    /// Whether the graph records undo history
    #[serde(default = "default_historied")]
    pub historied: bool,
    /// Cache eviction tier
    #[serde(default)]
    pub volatility: Volatility,
    /// Nodes in creation order
    #[serde(default)]
    pub nodes: Vec<DocumentNode>,
    /// Arcs ending in this graph, in connection order
    #[serde(default)]
    pub connections: Vec<DocumentConnection>,
}

fn default_historied() -> bool {
    true
}

impl GraphDocument {
    /// Create an empty document
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: DOCUMENT_FORMAT_VERSION,
            name: name.into(),
            historied: true,
            volatility: Volatility::Stable,
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Options for the graph this document describes
    pub fn config(&self) -> GraphConfig {
        GraphConfig {
            name: self.name.clone(),
            historied: self.historied,
            volatility: self.volatility,
            history_depth: None,
        }
    }

    /// Transaction recreating every node and arc
    pub fn to_transaction(&self) -> Transaction {
        let mut transaction = Transaction::new(format!("Load {}", self.name));
        for node in &self.nodes {
            transaction = transaction.create_node(
                node.id,
                node.node_type.clone(),
                node.properties.clone(),
            );
        }
        for connection in &self.connections {
            transaction = transaction.connect(
                connection.source.node,
                connection.source.label.clone(),
                connection.target.node,
                connection.target.label.clone(),
            );
        }
        transaction
    }

    /// Find a node by ID
    pub fn node(&self, id: NodeId) -> Option<&DocumentNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Serialize to RON format
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Deserialize from RON format
    pub fn from_ron(s: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(s)
    }

    /// Save document to file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = self
            .to_ron()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }

    /// Load document from file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let document = Self::from_ron(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        if document.version > DOCUMENT_FORMAT_VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "Document version {} is newer than supported version {}",
                    document.version, DOCUMENT_FORMAT_VERSION
                ),
            ));
        }
        Ok(document)
    }
}
