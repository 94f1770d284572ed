// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undo/redo history of committed transactions.
//!
//! Each committed transaction on a historied graph leaves one
//! [`HistoryRecord`] holding the primitive changes it applied and their
//! inverses. Undo replays the inverse list, redo replays the forward list,
//! both as atomic applications against the graph store.

use crate::connection::{Connection, ConnectionId};
use crate::error::GraphError;
use crate::graph::Revision;
use crate::node::{Node, NodeId};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default maximum undo history depth
pub const MAX_HISTORY: usize = 100;

/// Unique operation ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(u64);

impl OperationId {
    /// Get the raw ID value
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A primitive, reversible change to the graph store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    /// Insert a node (creation or resurrection)
    InsertNode(Node),
    /// Remove a node that has no remaining connections
    RemoveNode(NodeId),
    /// Set (`Some`) or clear (`None`) an explicit property value
    WriteProperty {
        /// Target node
        node: NodeId,
        /// Property label
        label: String,
        /// New explicit value
        value: Option<Value>,
    },
    /// Insert a connection, keeping its ID
    InsertConnection(Connection),
    /// Remove a connection
    RemoveConnection(ConnectionId),
}

/// A committed transaction that can be undone/redone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Unique operation ID
    pub id: OperationId,
    /// Human-readable description
    pub description: String,
    /// Revision the transaction produced
    pub revision: Revision,
    /// Changes as applied, in order
    pub forward: Vec<Change>,
    /// Inverse changes, in the order they must be applied
    pub inverse: Vec<Change>,
    /// Timestamp
    pub timestamp: u64,
}

impl HistoryRecord {
    /// Approximate memory size of this record (serialized bytes)
    pub fn memory_size(&self) -> usize {
        let forward = bincode::serialized_size(&self.forward).unwrap_or(0);
        let inverse = bincode::serialized_size(&self.inverse).unwrap_or(0);
        usize::try_from(forward + inverse).unwrap_or(usize::MAX)
    }

    /// Number of primitive changes
    pub fn count(&self) -> usize {
        self.forward.len()
    }

    /// Drop both directions of every connection change whose arc matches
    fn forget_connections(&mut self, released: &impl Fn(&Connection) -> bool) {
        let ids: HashSet<ConnectionId> = self
            .forward
            .iter()
            .chain(&self.inverse)
            .filter_map(|change| match change {
                Change::InsertConnection(connection) if released(connection) => Some(connection.id),
                _ => None,
            })
            .collect();
        if ids.is_empty() {
            return;
        }

        let keep = |change: &Change| match change {
            Change::InsertConnection(connection) => !ids.contains(&connection.id),
            Change::RemoveConnection(id) => !ids.contains(id),
            _ => true,
        };
        self.forward.retain(|change| keep(change));
        self.inverse.retain(|change| keep(change));
    }
}

/// History statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Records in the undo stack
    pub undo_count: usize,
    /// Records in the redo stack
    pub redo_count: usize,
    /// Total memory used by history (bytes)
    pub memory_used: usize,
    /// Maximum history depth
    pub max_depth: usize,
}

/// Undo/redo history of one graph
#[derive(Debug)]
pub struct History {
    /// Undo stack
    undo_stack: VecDeque<HistoryRecord>,
    /// Redo stack
    redo_stack: VecDeque<HistoryRecord>,
    /// Next operation ID
    next_id: u64,
    /// Maximum history depth
    max_depth: usize,
    /// Total memory used
    memory_used: usize,
}

impl History {
    /// Create a new history manager
    pub fn new() -> Self {
        Self::with_max_depth(MAX_HISTORY)
    }

    /// Create with custom maximum depth
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            next_id: 1,
            max_depth,
            memory_used: 0,
        }
    }

    /// Record a committed transaction
    pub fn commit(
        &mut self,
        description: String,
        revision: Revision,
        forward: Vec<Change>,
        inverse: Vec<Change>,
    ) {
        if forward.is_empty() {
            return;
        }

        let record = HistoryRecord {
            id: OperationId(self.next_id),
            description,
            revision,
            forward,
            inverse,
            timestamp: now(),
        };
        self.next_id += 1;

        // A new edit forks away from anything undone
        for dropped in self.redo_stack.drain(..) {
            self.memory_used = self.memory_used.saturating_sub(dropped.memory_size());
        }

        self.memory_used += record.memory_size();
        self.undo_stack.push_back(record);

        while self.undo_stack.len() > self.max_depth {
            if let Some(old) = self.undo_stack.pop_front() {
                self.memory_used = self.memory_used.saturating_sub(old.memory_size());
            }
        }
    }

    /// Record that would be undone next
    pub fn next_undo(&self) -> Option<&HistoryRecord> {
        self.undo_stack.back()
    }

    /// Record that would be redone next
    pub fn next_redo(&self) -> Option<&HistoryRecord> {
        self.redo_stack.back()
    }

    /// Move the last record to the redo stack
    pub fn undo(&mut self) -> Result<&HistoryRecord, GraphError> {
        let record = self.undo_stack.pop_back().ok_or(GraphError::NothingToUndo)?;
        self.redo_stack.push_back(record);
        self.redo_stack.back().ok_or(GraphError::NothingToUndo)
    }

    /// Move the last undone record back to the undo stack
    pub fn redo(&mut self) -> Result<&HistoryRecord, GraphError> {
        let record = self.redo_stack.pop_back().ok_or(GraphError::NothingToRedo)?;
        self.undo_stack.push_back(record);
        self.undo_stack.back().ok_or(GraphError::NothingToRedo)
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Forget arcs that can no longer be replayed, e.g. arcs owned by a
    /// deleted graph. Records left with no changes are dropped.
    pub fn forget_connections(&mut self, released: impl Fn(&Connection) -> bool) {
        for stack in [&mut self.undo_stack, &mut self.redo_stack] {
            for record in stack.iter_mut() {
                record.forget_connections(&released);
            }
            stack.retain(|record| !record.forward.is_empty());
        }
        self.memory_used = self
            .undo_stack
            .iter()
            .chain(&self.redo_stack)
            .map(HistoryRecord::memory_size)
            .sum();
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.memory_used = 0;
    }

    /// Get history statistics
    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            undo_count: self.undo_stack.len(),
            redo_count: self.redo_stack.len(),
            memory_used: self.memory_used,
            max_depth: self.max_depth,
        }
    }

    /// Get description of next undo operation
    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.back().map(|r| r.description.as_str())
    }

    /// Get description of next redo operation
    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.back().map(|r| r.description.as_str())
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
