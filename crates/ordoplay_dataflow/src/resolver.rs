// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dependency resolution for output requests.

use crate::cache::ValueCache;
use crate::error::{GraphError, LabelKind, Result};
use crate::graph::GraphStore;
use crate::node::NodeRegistry;
use crate::port::Endpoint;
use indexmap::IndexSet;
use std::collections::HashSet;

/// Computes evaluation orders over a consistent view of the store
pub struct Resolver<'a> {
    store: &'a GraphStore,
    registry: &'a NodeRegistry,
    cache: &'a ValueCache,
}

impl<'a> Resolver<'a> {
    /// Create a resolver
    pub fn new(store: &'a GraphStore, registry: &'a NodeRegistry, cache: &'a ValueCache) -> Self {
        Self {
            store,
            registry,
            cache,
        }
    }

    /// Upstream outputs in a valid evaluation order, ending with `request`.
    ///
    /// Cached outputs appear in the order but their own upstream is not
    /// traversed.
    pub fn resolve(&self, request: &Endpoint) -> Result<Vec<Endpoint>> {
        self.plan(request, false)
    }

    /// Like [`Self::resolve`], but always traverses the upstream of `request`
    /// itself even if it is cached.
    pub fn resolve_uncached(&self, request: &Endpoint) -> Result<Vec<Endpoint>> {
        self.plan(request, true)
    }

    fn plan(&self, request: &Endpoint, force_root: bool) -> Result<Vec<Endpoint>> {
        let mut visited = HashSet::new();
        let mut in_progress = IndexSet::new();
        let mut order = Vec::new();
        self.visit(request, force_root, &mut visited, &mut in_progress, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        key: &Endpoint,
        force: bool,
        visited: &mut HashSet<Endpoint>,
        in_progress: &mut IndexSet<Endpoint>,
        order: &mut Vec<Endpoint>,
    ) -> Result<()> {
        if let Some(start) = in_progress.get_index_of(key) {
            let mut path: Vec<Endpoint> = in_progress.iter().skip(start).cloned().collect();
            path.push(key.clone());
            return Err(GraphError::CyclicDependency(path));
        }
        if visited.contains(key) {
            return Ok(());
        }

        if force || !self.cache.contains(key) {
            in_progress.insert(key.clone());
            for dependency in self.dependencies(key)? {
                self.visit(&dependency, false, visited, in_progress, order)?;
            }
            in_progress.pop();
        }

        visited.insert(key.clone());
        order.push(key.clone());
        Ok(())
    }

    /// Outputs `key` reads directly: connected sources of its input
    /// arguments and sibling outputs it names
    pub fn dependencies(&self, key: &Endpoint) -> Result<Vec<Endpoint>> {
        let (node, node_type) = self.store.node_with_type(self.registry, key.node)?;
        let output = node_type
            .find_output(&key.label)
            .ok_or_else(|| GraphError::unknown_label(&node_type.id, LabelKind::Output, &key.label))?;

        let mut dependencies = Vec::new();
        for argument in &output.arguments {
            match node_type.label_kind(argument) {
                Some(LabelKind::Input) => {
                    let target = Endpoint::new(node.id, argument.clone());
                    dependencies.extend(
                        self.store
                            .connections
                            .sources_of(&target)
                            .into_iter()
                            .map(|c| c.source.clone()),
                    );
                }
                Some(LabelKind::Output) => dependencies.push(Endpoint::new(node.id, argument.clone())),
                Some(LabelKind::Property) => {}
                None => {
                    return Err(GraphError::unknown_label(&node_type.id, LabelKind::Output, argument));
                }
            }
        }
        Ok(dependencies)
    }
}
