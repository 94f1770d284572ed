// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property, input and output declarations of node types.

use crate::error::ProductionError;
use crate::evaluation::Arguments;
use crate::node::NodeId;
use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pure function computing an output (or derived property default)
pub type ProductionFn = fn(&Arguments) -> Result<Value, ProductionError>;

/// A labelled slot on a node instance: `(node, label)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    /// Node ID
    pub node: NodeId,
    /// Property, input or output label
    pub label: String,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(node: NodeId, label: impl Into<String>) -> Self {
        Self {
            node,
            label: label.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.label)
    }
}

/// How many arcs an input accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// At most one arc; the function sees the value itself
    Single,
    /// Any number of arcs; the function sees a list in connection order
    Many,
}

/// Default of a property that was never set explicitly
#[derive(Clone)]
pub enum PropertyDefault {
    /// Constant default
    Value(Value),
    /// Computed from other properties of the same node
    Derived {
        /// Properties read by the function
        arguments: Vec<String>,
        /// The function
        function: ProductionFn,
    },
}

impl fmt::Debug for PropertyDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Derived { arguments, .. } => f
                .debug_struct("Derived")
                .field("arguments", arguments)
                .finish_non_exhaustive(),
        }
    }
}

/// A property declared by a node type
#[derive(Debug, Clone)]
pub struct PropertyDecl {
    /// Property label
    pub name: String,
    /// Accepted value kind
    pub kind: ValueKind,
    /// Default when unset
    pub default: PropertyDefault,
}

impl PropertyDecl {
    /// Create a new property defaulting to `Nil`
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: PropertyDefault::Value(Value::Nil),
        }
    }

    /// Set a constant default
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = PropertyDefault::Value(value.into());
        self
    }

    /// Derive the default from other properties
    pub fn with_derived_default(mut self, arguments: &[&str], function: ProductionFn) -> Self {
        self.default = PropertyDefault::Derived {
            arguments: arguments.iter().map(|a| (*a).to_string()).collect(),
            function,
        };
        self
    }
}

/// An input declared by a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDecl {
    /// Input label
    pub name: String,
    /// Accepted value kind
    pub kind: ValueKind,
    /// How many arcs may feed it
    pub cardinality: Cardinality,
    /// Whether an unconnected single input is a failure rather than `Nil`
    pub required: bool,
}

impl InputDecl {
    /// Create a single-valued input
    pub fn single(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            cardinality: Cardinality::Single,
            required: false,
        }
    }

    /// Create a multi-valued input
    pub fn many(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            cardinality: Cardinality::Many,
            required: false,
        }
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// An output declared by a node type
#[derive(Clone)]
pub struct OutputDecl {
    /// Output label
    pub name: String,
    /// Produced value kind
    pub kind: ValueKind,
    /// Property, input and output labels the function reads
    pub arguments: Vec<String>,
    /// The production function
    pub function: ProductionFn,
    /// Whether results are memoized
    pub cacheable: bool,
}

impl OutputDecl {
    /// Create a new cacheable output
    pub fn new(
        name: impl Into<String>,
        kind: ValueKind,
        arguments: &[&str],
        function: ProductionFn,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            arguments: arguments.iter().map(|a| (*a).to_string()).collect(),
            function,
            cacheable: true,
        }
    }

    /// Recompute on every request
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }
}

impl fmt::Debug for OutputDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputDecl")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("arguments", &self.arguments)
            .field("cacheable", &self.cacheable)
            .finish_non_exhaustive()
    }
}
