// SPDX-License-Identifier: MIT OR Apache-2.0
//! Asset nodes: resources and the collections grouping them.
//!
//! Every asset node exposes the outputs editor collaborators consume:
//! - `save-value`: what gets written to disk
//! - `build-targets`: paths to build, aggregated over dependencies
//! - `outline`: entry for the project outline view
//!
//! Resource dependencies connect to another resource's `build-targets`;
//! collection children connect to a child's `outline`.

use crate::error::{ProductionError, RegistryError};
use crate::evaluation::Arguments;
use crate::node::{NodeCategory, NodeRegistry, NodeType};
use crate::port::{InputDecl, OutputDecl, PropertyDecl};
use crate::value::{Value, ValueKind};
use std::collections::BTreeMap;

/// Key of a child's targets inside an `outline` map
const TARGETS_KEY: &str = "build-targets";

/// Create the asset node registry
pub fn create_asset_registry() -> Result<NodeRegistry, RegistryError> {
    let mut registry = NodeRegistry::new();

    registry.register(
        NodeType::new("resource", "Resource", NodeCategory::Asset)
            .with_description("A file-backed asset")
            .property(PropertyDecl::new("path", ValueKind::String).with_default(""))
            .property(PropertyDecl::new("content", ValueKind::Any))
            .input(InputDecl::many("dependencies", ValueKind::List))
            .output(OutputDecl::new(
                "save-value",
                ValueKind::Map,
                &["path", "content"],
                resource_save_value,
            ))
            .output(OutputDecl::new(
                "build-targets",
                ValueKind::List,
                &["path", "dependencies"],
                resource_build_targets,
            ))
            .output(OutputDecl::new(
                "outline",
                ValueKind::Map,
                &["path", "build-targets"],
                resource_outline,
            )),
    )?;

    registry.register(
        NodeType::new("collection", "Collection", NodeCategory::Asset)
            .with_description("Named group of assets")
            .property(PropertyDecl::new("name", ValueKind::String).with_default("Collection"))
            .input(InputDecl::many("children", ValueKind::Map))
            .output(OutputDecl::new(
                "build-targets",
                ValueKind::List,
                &["children"],
                collection_build_targets,
            ))
            .output(OutputDecl::new(
                "outline",
                ValueKind::Map,
                &["name", "children", "build-targets"],
                collection_outline,
            ))
            .output(OutputDecl::new(
                "save-value",
                ValueKind::Map,
                &["name", "children"],
                collection_save_value,
            )),
    )?;

    Ok(registry)
}

fn resource_save_value(args: &Arguments) -> Result<Value, ProductionError> {
    let mut map = BTreeMap::new();
    map.insert("path".to_string(), Value::from(args.str("path")?));
    map.insert("content".to_string(), args.get("content")?.clone());
    Ok(Value::Map(map))
}

fn resource_build_targets(args: &Arguments) -> Result<Value, ProductionError> {
    let path = args.str("path")?;
    if path.is_empty() {
        return Err(ProductionError::new("resource has no path"));
    }

    let mut targets = Targets::default();
    for dependency in args.list("dependencies")? {
        targets.extend_from(dependency)?;
    }
    targets.push(path);
    Ok(targets.into_value())
}

fn resource_outline(args: &Arguments) -> Result<Value, ProductionError> {
    let mut map = BTreeMap::new();
    map.insert("label".to_string(), Value::from(args.str("path")?));
    map.insert(TARGETS_KEY.to_string(), args.get("build-targets")?.clone());
    Ok(Value::Map(map))
}

fn collection_build_targets(args: &Arguments) -> Result<Value, ProductionError> {
    let mut targets = Targets::default();
    for child in args.list("children")? {
        let outline = child
            .as_map()
            .ok_or_else(|| ProductionError::new(format!("child is a {}, not an outline", child.kind_name())))?;
        if let Some(child_targets) = outline.get(TARGETS_KEY) {
            targets.extend_from(child_targets)?;
        }
    }
    Ok(targets.into_value())
}

fn collection_outline(args: &Arguments) -> Result<Value, ProductionError> {
    let mut map = BTreeMap::new();
    map.insert("label".to_string(), Value::from(args.str("name")?));
    map.insert("children".to_string(), Value::List(args.list("children")?.to_vec()));
    map.insert(TARGETS_KEY.to_string(), args.get("build-targets")?.clone());
    Ok(Value::Map(map))
}

fn collection_save_value(args: &Arguments) -> Result<Value, ProductionError> {
    let labels = args
        .list("children")?
        .iter()
        .filter_map(|child| child.as_map()?.get("label").cloned())
        .collect();
    let mut map = BTreeMap::new();
    map.insert("name".to_string(), Value::from(args.str("name")?));
    map.insert("children".to_string(), Value::List(labels));
    Ok(Value::Map(map))
}

/// Ordered, duplicate-free list of build target paths
#[derive(Default)]
struct Targets(Vec<String>);

impl Targets {
    fn push(&mut self, path: &str) {
        if !self.0.iter().any(|p| p == path) {
            self.0.push(path.to_string());
        }
    }

    fn extend_from(&mut self, value: &Value) -> Result<(), ProductionError> {
        match value {
            Value::Nil => Ok(()),
            Value::String(path) => {
                self.push(path);
                Ok(())
            }
            Value::List(items) => items.iter().try_for_each(|item| self.extend_from(item)),
            other => Err(ProductionError::new(format!(
                "build target must be a path, got {}",
                other.kind_name()
            ))),
        }
    }

    fn into_value(self) -> Value {
        Value::List(self.0.into_iter().map(Value::String).collect())
    }
}
