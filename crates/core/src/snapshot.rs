//! Point-in-time views of a progress subtree.

use crate::account::Fraction;
use crate::id::NodeId;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A snapshot of one node, and the nodes attached beneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Node this snapshot describes
    pub id: NodeId,

    /// When snapshot was taken
    pub timestamp: Time,

    /// Optional caller-defined kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Total units
    pub total_units: i64,

    /// Units completed directly, including folded child slices
    pub completed_units: i64,

    /// Fraction including in-flight child contributions
    pub fraction: Fraction,

    /// Human-readable fraction
    pub description: String,

    /// Human-readable unit counts
    pub additional_description: String,

    /// Whether consumers may cancel
    pub cancellable: bool,
    /// Whether cancelled
    pub cancelled: bool,

    /// Whether consumers may pause
    pub pausable: bool,
    /// Whether paused
    pub paused: bool,

    /// Caller-attached values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_info: BTreeMap<String, serde_json::Value>,

    /// Attached children in attachment order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildSnapshot>,
}

/// A child node as seen from its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSnapshot {
    /// Parent units reserved for this child
    pub pending_units: i64,

    /// Whether the slice has been folded into the parent's completed units
    pub folded: bool,

    /// The child itself
    pub progress: ProgressSnapshot,
}

impl ProgressSnapshot {
    /// Number of nodes in this subtree, including this one.
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|child| child.progress.node_count())
            .sum::<usize>()
    }

    /// Find a node in this subtree.
    pub fn find(&self, id: NodeId) -> Option<&ProgressSnapshot> {
        if self.id == id {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.progress.find(id))
    }
}
