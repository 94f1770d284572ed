// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node type descriptors, node instances and the type registry.

use crate::error::{ComputationError, GraphError, LabelKind, ProductionError, RegistryError};
use crate::evaluation::Arguments;
use crate::graph::GraphId;
use crate::port::{Endpoint, InputDecl, OutputDecl, PropertyDecl, PropertyDefault};
use crate::value::{Value, ValueKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Output every node type gets: map of all effective property values
pub const PROPERTIES_OUTPUT: &str = "_properties";

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Node type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Persisted assets (resources, collections)
    Asset,
    /// Derived views (outlines, previews)
    View,
    /// Math operations
    Math,
    /// Utility nodes
    Utility,
    /// Custom/user-defined
    Custom,
}

/// Node type definition
#[derive(Debug, Clone)]
pub struct NodeType {
    /// Unique type tag
    pub id: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Declared properties
    pub properties: Vec<PropertyDecl>,
    /// Declared inputs
    pub inputs: Vec<InputDecl>,
    /// Declared outputs
    pub outputs: Vec<OutputDecl>,
}

impl NodeType {
    /// Create an empty type definition
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            description: String::new(),
            properties: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a property
    pub fn property(mut self, property: PropertyDecl) -> Self {
        self.properties.push(property);
        self
    }

    /// Declare an input
    pub fn input(mut self, input: InputDecl) -> Self {
        self.inputs.push(input);
        self
    }

    /// Declare an output
    pub fn output(mut self, output: OutputDecl) -> Self {
        self.outputs.push(output);
        self
    }

    /// Get a property declaration
    pub fn find_property(&self, label: &str) -> Option<&PropertyDecl> {
        self.properties.iter().find(|p| p.name == label)
    }

    /// Get an input declaration
    pub fn find_input(&self, label: &str) -> Option<&InputDecl> {
        self.inputs.iter().find(|p| p.name == label)
    }

    /// Get an output declaration
    pub fn find_output(&self, label: &str) -> Option<&OutputDecl> {
        self.outputs.iter().find(|p| p.name == label)
    }

    /// Which schema section declares `label`
    pub fn label_kind(&self, label: &str) -> Option<LabelKind> {
        if self.find_property(label).is_some() {
            Some(LabelKind::Property)
        } else if self.find_input(label).is_some() {
            Some(LabelKind::Input)
        } else if self.find_output(label).is_some() {
            Some(LabelKind::Output)
        } else {
            None
        }
    }

    fn labels(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.inputs.iter().map(|i| i.name.as_str()))
            .chain(self.outputs.iter().map(|o| o.name.as_str()))
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let mut seen = std::collections::HashSet::new();
        for label in self.labels() {
            if !seen.insert(label) {
                return Err(RegistryError::DuplicateLabel {
                    node_type: self.id.clone(),
                    label: label.to_string(),
                });
            }
        }

        for output in &self.outputs {
            for argument in &output.arguments {
                if self.label_kind(argument).is_none() {
                    return Err(RegistryError::UnknownArgument {
                        node_type: self.id.clone(),
                        owner: output.name.clone(),
                        argument: argument.clone(),
                    });
                }
            }
        }

        for property in &self.properties {
            if let PropertyDefault::Derived { arguments, .. } = &property.default {
                for argument in arguments {
                    if self.find_property(argument).is_none() {
                        return Err(RegistryError::UnknownArgument {
                            node_type: self.id.clone(),
                            owner: property.name.clone(),
                            argument: argument.clone(),
                        });
                    }
                }
            }
        }

        self.check_default_cycles()
    }

    fn check_default_cycles(&self) -> Result<(), RegistryError> {
        let mut done = std::collections::HashSet::new();
        for property in &self.properties {
            let mut stack = Vec::new();
            self.visit_default(&property.name, &mut stack, &mut done)?;
        }
        Ok(())
    }

    fn visit_default<'a>(
        &'a self,
        name: &'a str,
        stack: &mut Vec<&'a str>,
        done: &mut std::collections::HashSet<&'a str>,
    ) -> Result<(), RegistryError> {
        if let Some(pos) = stack.iter().position(|p| *p == name) {
            let mut properties: Vec<String> = stack[pos..].iter().map(|p| (*p).to_string()).collect();
            properties.push(name.to_string());
            return Err(RegistryError::DefaultCycle {
                node_type: self.id.clone(),
                properties,
            });
        }
        if done.contains(name) {
            return Ok(());
        }

        stack.push(name);
        if let Some(PropertyDecl {
            default: PropertyDefault::Derived { arguments, .. },
            ..
        }) = self.find_property(name)
        {
            for argument in arguments {
                self.visit_default(argument, stack, done)?;
            }
        }
        stack.pop();
        done.insert(name);
        Ok(())
    }

    /// Add the implicit `_properties` output unless declared
    fn with_builtin_outputs(mut self) -> Self {
        if self.find_output(PROPERTIES_OUTPUT).is_none() {
            let names: Vec<&str> = self.properties.iter().map(|p| p.name.as_str()).collect();
            let output = OutputDecl::new(PROPERTIES_OUTPUT, ValueKind::Map, &names, properties_map);
            self.outputs.push(output);
        }
        self
    }
}

fn properties_map(args: &Arguments) -> Result<Value, ProductionError> {
    let map: BTreeMap<String, Value> = args
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    Ok(Value::Map(map))
}

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Owning graph
    pub graph: GraphId,
    /// Node type tag
    pub node_type: String,
    /// Explicitly set property values
    pub properties: IndexMap<String, Value>,
    /// Creation order within the workspace, kept across undo
    pub ordinal: u64,
}

impl Node {
    /// Whether `label` has an explicit value
    pub fn is_set(&self, label: &str) -> bool {
        self.properties.contains_key(label)
    }

    /// Effective value of a property: explicit, or the (possibly derived) default
    pub fn property_value(&self, node_type: &NodeType, label: &str) -> Result<Value, GraphError> {
        if let Some(value) = self.properties.get(label) {
            return Ok(value.clone());
        }

        let decl = node_type
            .find_property(label)
            .ok_or_else(|| GraphError::unknown_label(&node_type.id, LabelKind::Property, label))?;

        match &decl.default {
            PropertyDefault::Value(value) => Ok(value.clone()),
            PropertyDefault::Derived { arguments, function } => {
                let mut args = Arguments::new(self.id);
                for argument in arguments {
                    args.insert(argument.clone(), self.property_value(node_type, argument)?);
                }
                function(&args).map_err(|err| {
                    ComputationError::failed(Endpoint::new(self.id, label), err.0).into()
                })
            }
        }
    }
}

/// Registry of available node types
#[derive(Debug)]
pub struct NodeRegistry {
    /// Registered node types by ID
    types: IndexMap<String, NodeType>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            types: IndexMap::new(),
        }
    }

    /// Register a node type after validating its schema
    pub fn register(&mut self, node_type: NodeType) -> Result<(), RegistryError> {
        if self.types.contains_key(&node_type.id) {
            return Err(RegistryError::DuplicateType(node_type.id));
        }

        let node_type = node_type.with_builtin_outputs();
        node_type.validate()?;
        self.types.insert(node_type.id.clone(), node_type);
        Ok(())
    }

    /// Get a node type by ID
    pub fn get(&self, id: &str) -> Option<&NodeType> {
        self.types.get(id)
    }

    /// Get a node type by ID or fail with `UnknownNodeType`
    pub fn require(&self, id: &str) -> Result<&NodeType, GraphError> {
        self.get(id)
            .ok_or_else(|| GraphError::UnknownNodeType(id.to_string()))
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values()
    }

    /// Get types by category
    pub fn types_in_category(&self, category: NodeCategory) -> impl Iterator<Item = &NodeType> {
        self.types.values().filter(move |t| t.category == category)
    }

    /// Merge every type of another registry into this one
    pub fn extend(&mut self, other: NodeRegistry) -> Result<(), RegistryError> {
        for (id, node_type) in other.types {
            if self.types.contains_key(&id) {
                return Err(RegistryError::DuplicateType(id));
            }
            self.types.insert(id, node_type);
        }
        Ok(())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
