// SPDX-License-Identifier: MIT OR Apache-2.0
//! Value cache and invalidation propagation.
//!
//! Entries are keyed by `(node, output)` and stamped with the revision of the
//! owning graph at computation time. Entries are evicted by the propagator
//! before any mutation on their dependency path commits, so a surviving
//! entry is always valid at its graph's current revision.
//!
//! When the cache is bounded, entries are held in one LRU list per
//! [`Volatility`] tier and the most volatile tier gives up entries first.

use crate::connection::ConnectionTable;
use crate::error::ComputationError;
use crate::graph::{Revision, Volatility};
use crate::node::NodeId;
use crate::port::Endpoint;
use crate::value::Value;
use indexmap::IndexSet;
use lru::LruCache;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::num::NonZeroUsize;

/// Outcome of an output: a value or a captured computation failure
pub type OutputResult = Result<Value, ComputationError>;

/// A memoized output
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Revision of the owning graph when computed
    pub revision: Revision,
    /// The result
    pub result: OutputResult,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held
    pub entries: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to compute
    pub misses: u64,
    /// Entries dropped by invalidation
    pub invalidated: u64,
    /// Entries dropped for capacity
    pub evicted: u64,
}

/// Memoized outputs of every graph in a workspace
pub struct ValueCache {
    tiers: BTreeMap<Volatility, LruCache<Endpoint, CacheEntry>>,
    by_node: HashMap<NodeId, (Volatility, IndexSet<String>)>,
    capacity: Option<NonZeroUsize>,
    computations: HashMap<Endpoint, u64>,
    stats: CacheStats,
}

impl ValueCache {
    /// Create an unbounded cache
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create a cache holding at most `capacity` entries
    pub fn with_capacity(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            tiers: BTreeMap::new(),
            by_node: HashMap::new(),
            capacity,
            computations: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Look up an entry, refreshing its recency
    pub fn get(&mut self, key: &Endpoint) -> Option<CacheEntry> {
        let entry = self
            .by_node
            .get(&key.node)
            .map(|(tier, _)| *tier)
            .and_then(|tier| self.tiers.get_mut(&tier))
            .and_then(|lru| lru.get(key))
            .cloned();
        match entry {
            Some(_) => self.stats.hits += 1,
            None => self.stats.misses += 1,
        }
        entry
    }

    /// Whether an entry is present, without touching recency or counters
    pub fn contains(&self, key: &Endpoint) -> bool {
        self.by_node
            .get(&key.node)
            .is_some_and(|(_, outputs)| outputs.contains(&key.label))
    }

    /// Store an entry for a node of the given tier
    pub fn insert(&mut self, key: Endpoint, volatility: Volatility, entry: CacheEntry) {
        if !self.contains(&key) {
            if let Some(capacity) = self.capacity {
                while self.stats.entries >= capacity.get() {
                    if !self.evict_one() {
                        break;
                    }
                }
            }
            self.stats.entries += 1;
        }

        let (_, outputs) = self
            .by_node
            .entry(key.node)
            .or_insert_with(|| (volatility, IndexSet::new()));
        outputs.insert(key.label.clone());
        self.tiers
            .entry(volatility)
            .or_insert_with(LruCache::unbounded)
            .put(key, entry);
    }

    /// Drop the least recently used entry of the most volatile tier
    fn evict_one(&mut self) -> bool {
        for lru in self.tiers.values_mut().rev() {
            if let Some((key, _)) = lru.pop_lru() {
                tracing::trace!("Evicted cached {key} for capacity");
                if let Some((_, outputs)) = self.by_node.get_mut(&key.node) {
                    outputs.shift_remove(&key.label);
                    if outputs.is_empty() {
                        self.by_node.remove(&key.node);
                    }
                }
                self.stats.entries = self.stats.entries.saturating_sub(1);
                self.stats.evicted += 1;
                return true;
            }
        }
        false
    }

    /// Drop every entry of a node, returning how many were dropped
    pub fn invalidate_node(&mut self, node: NodeId) -> usize {
        let Some((tier, outputs)) = self.by_node.remove(&node) else {
            return 0;
        };
        let mut dropped = 0;
        if let Some(lru) = self.tiers.get_mut(&tier) {
            for label in outputs {
                if lru.pop(&Endpoint::new(node, label)).is_some() {
                    dropped += 1;
                }
            }
        }
        self.stats.entries = self.stats.entries.saturating_sub(dropped);
        self.stats.invalidated += dropped as u64;
        dropped
    }

    /// Drop every entry of every given node
    pub fn invalidate_nodes<'a>(&mut self, nodes: impl IntoIterator<Item = &'a NodeId>) -> usize {
        nodes.into_iter().map(|node| self.invalidate_node(*node)).sum()
    }

    /// Drop entries and counters of a node that no longer exists
    pub fn forget_node(&mut self, node: NodeId) {
        self.invalidate_node(node);
        self.computations.retain(|key, _| key.node != node);
    }

    /// Count one execution of an output's production function
    pub fn record_computation(&mut self, key: &Endpoint) {
        *self.computations.entry(key.clone()).or_insert(0) += 1;
    }

    /// How many times an output's production function has run
    pub fn computation_count(&self, key: &Endpoint) -> u64 {
        self.computations.get(key).copied().unwrap_or(0)
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.stats.entries
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.stats.entries == 0
    }
}

impl Default for ValueCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValueCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Walks the arc table forward to find everything a change can reach
pub struct Propagator<'a> {
    connections: &'a ConnectionTable,
}

impl<'a> Propagator<'a> {
    /// Create a propagator over a connection table
    pub fn new(connections: &'a ConnectionTable) -> Self {
        Self { connections }
    }

    /// Every node reachable from `roots` along arcs, roots included
    pub fn reachable(&self, roots: impl IntoIterator<Item = NodeId>) -> IndexSet<NodeId> {
        let mut reached = IndexSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        for root in roots {
            if reached.insert(root) {
                queue.push_back(root);
            }
        }

        while let Some(node) = queue.pop_front() {
            for connection in self.connections.outgoing(node) {
                if reached.insert(connection.target.node) {
                    queue.push_back(connection.target.node);
                }
            }
        }
        reached
    }
}
