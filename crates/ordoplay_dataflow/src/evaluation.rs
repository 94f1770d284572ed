// SPDX-License-Identifier: MIT OR Apache-2.0
//! Output evaluation: argument bundles and production function execution.

use crate::cache::{CacheEntry, OutputResult, ValueCache};
use crate::error::{ComputationError, GraphError, LabelKind, ProductionError, Result};
use crate::graph::GraphStore;
use crate::node::{NodeId, NodeRegistry};
use crate::port::{Cardinality, Endpoint};
use crate::resolver::Resolver;
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Named arguments handed to a production function
#[derive(Debug, Clone, PartialEq)]
pub struct Arguments {
    node: NodeId,
    values: IndexMap<String, Value>,
}

impl Arguments {
    /// Create an empty bundle for a node
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            values: IndexMap::new(),
        }
    }

    /// Node the function runs for
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Add an argument
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Get an argument
    pub fn get(&self, name: &str) -> std::result::Result<&Value, ProductionError> {
        self.values
            .get(name)
            .ok_or_else(|| ProductionError::new(format!("missing argument '{name}'")))
    }

    /// Get a numeric argument
    pub fn float(&self, name: &str) -> std::result::Result<f64, ProductionError> {
        let value = self.get(name)?;
        value.as_float().ok_or_else(|| mismatch(name, "number", value))
    }

    /// Get an integer argument
    pub fn int(&self, name: &str) -> std::result::Result<i64, ProductionError> {
        let value = self.get(name)?;
        value.as_int().ok_or_else(|| mismatch(name, "int", value))
    }

    /// Get a boolean argument
    pub fn bool(&self, name: &str) -> std::result::Result<bool, ProductionError> {
        let value = self.get(name)?;
        value.as_bool().ok_or_else(|| mismatch(name, "bool", value))
    }

    /// Get a string argument
    pub fn str(&self, name: &str) -> std::result::Result<&str, ProductionError> {
        let value = self.get(name)?;
        value.as_str().ok_or_else(|| mismatch(name, "string", value))
    }

    /// Get a list argument (multi-valued inputs arrive as lists)
    pub fn list(&self, name: &str) -> std::result::Result<&[Value], ProductionError> {
        let value = self.get(name)?;
        value.as_list().ok_or_else(|| mismatch(name, "list", value))
    }

    /// Get a map argument
    pub fn map(&self, name: &str) -> std::result::Result<&BTreeMap<String, Value>, ProductionError> {
        let value = self.get(name)?;
        value.as_map().ok_or_else(|| mismatch(name, "map", value))
    }

    /// All arguments in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the bundle is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn mismatch(name: &str, expected: &str, value: &Value) -> ProductionError {
    ProductionError::new(format!(
        "argument '{name}' expected {expected}, got {}",
        value.kind_name()
    ))
}

/// Evaluates outputs for one read request against a fixed store snapshot.
///
/// The caller holds the store read lock for the evaluator's lifetime; the
/// cache is locked only around individual lookups and fills, never while a
/// production function runs.
pub struct Evaluator<'a> {
    store: &'a GraphStore,
    registry: &'a NodeRegistry,
    cache: &'a Mutex<ValueCache>,
    /// Results produced or fetched during this request
    local: HashMap<Endpoint, OutputResult>,
}

impl<'a> Evaluator<'a> {
    /// Create an evaluator
    pub fn new(store: &'a GraphStore, registry: &'a NodeRegistry, cache: &'a Mutex<ValueCache>) -> Self {
        Self {
            store,
            registry,
            cache,
            local: HashMap::new(),
        }
    }

    /// Cached result of `request`, or evaluate and fill the cache
    pub fn get_or_compute(&mut self, request: &Endpoint) -> Result<OutputResult> {
        if let Some(result) = self.lookup(request) {
            return Ok(result);
        }
        let plan = {
            let cache = self.cache.lock();
            Resolver::new(self.store, self.registry, &cache).resolve(request)?
        };
        self.run(&plan, None)?;
        self.result_of(request)
    }

    /// Run the production function of `request` now, reading upstream
    /// values from the cache where possible
    pub fn evaluate(&mut self, request: &Endpoint) -> Result<OutputResult> {
        let plan = {
            let cache = self.cache.lock();
            Resolver::new(self.store, self.registry, &cache).resolve_uncached(request)?
        };
        self.local.remove(request);
        self.run(&plan, Some(request))?;
        self.result_of(request)
    }

    fn run(&mut self, plan: &[Endpoint], force: Option<&Endpoint>) -> Result<()> {
        for key in plan {
            if force == Some(key) || self.lookup(key).is_none() {
                // Failures stay in `local` and are read back by `result_of`
                let _ = self.compute(key)?;
            }
        }
        Ok(())
    }

    fn result_of(&mut self, key: &Endpoint) -> Result<OutputResult> {
        match self.local.get(key) {
            Some(result) => Ok(result.clone()),
            None => self.compute(key),
        }
    }

    /// Result from this request or the cache
    fn lookup(&mut self, key: &Endpoint) -> Option<OutputResult> {
        if let Some(result) = self.local.get(key) {
            return Some(result.clone());
        }
        let entry = self.cache.lock().get(key)?;
        tracing::trace!("Cache hit for {key} (revision {})", entry.revision);
        self.local.insert(key.clone(), entry.result.clone());
        Some(entry.result)
    }

    /// Value of an upstream output, resolving it if the plan did not cover it
    fn upstream(&mut self, key: &Endpoint) -> Result<OutputResult> {
        match self.lookup(key) {
            Some(result) => Ok(result),
            None => self.get_or_compute(key),
        }
    }

    fn compute(&mut self, key: &Endpoint) -> Result<OutputResult> {
        let store = self.store;
        let (node, node_type) = store.node_with_type(self.registry, key.node)?;
        let output = node_type
            .find_output(&key.label)
            .ok_or_else(|| GraphError::unknown_label(&node_type.id, LabelKind::Output, &key.label))?;
        let graph = store.graph(node.graph)?;

        let mut args = Arguments::new(node.id);
        let mut failures = Vec::new();

        for argument in &output.arguments {
            match node_type.label_kind(argument) {
                Some(LabelKind::Property) => match node.property_value(node_type, argument) {
                    Ok(value) => args.insert(argument.clone(), value),
                    Err(GraphError::Computation(err)) => failures.push(err),
                    Err(err) => return Err(err),
                },
                Some(LabelKind::Input) => {
                    let Some(input) = node_type.find_input(argument) else {
                        continue;
                    };
                    let target = Endpoint::new(node.id, argument.clone());
                    let sources = store.connections.sources_of(&target);
                    match input.cardinality {
                        Cardinality::Single => match sources.first() {
                            Some(connection) => match self.upstream(&connection.source)? {
                                Ok(value) => args.insert(argument.clone(), value),
                                Err(err) => failures.push(err),
                            },
                            None if input.required => failures.push(ComputationError::failed(
                                target,
                                "required input is not connected",
                            )),
                            None => args.insert(argument.clone(), Value::Nil),
                        },
                        Cardinality::Many => {
                            let mut values = Vec::with_capacity(sources.len());
                            for connection in sources {
                                match self.upstream(&connection.source)? {
                                    Ok(value) => values.push(value),
                                    Err(err) => failures.push(err),
                                }
                            }
                            args.insert(argument.clone(), Value::List(values));
                        }
                    }
                }
                Some(LabelKind::Output) => {
                    let sibling = Endpoint::new(node.id, argument.clone());
                    match self.upstream(&sibling)? {
                        Ok(value) => args.insert(argument.clone(), value),
                        Err(err) => failures.push(err),
                    }
                }
                None => {
                    return Err(GraphError::unknown_label(&node_type.id, LabelKind::Output, argument));
                }
            }
        }

        let ran = failures.is_empty();
        let result = if ran {
            (output.function)(&args).map_err(|err| ComputationError::failed(key.clone(), err.0))
        } else {
            Err(ComputationError::upstream(key.clone(), failures))
        };

        if let Err(err) = &result {
            tracing::debug!("Output {key} failed: {err}");
        }

        {
            let mut cache = self.cache.lock();
            if ran {
                cache.record_computation(key);
            }
            if output.cacheable {
                cache.insert(
                    key.clone(),
                    graph.config.volatility,
                    CacheEntry {
                        revision: graph.revision,
                        result: result.clone(),
                    },
                );
            }
        }

        self.local.insert(key.clone(), result.clone());
        Ok(result)
    }
}
