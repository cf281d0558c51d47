//! Edge types for workflow graphs.
//!
//! Edges connect nodes. An edge optionally carries a handle naming the
//! branch it represents: condition and loop nodes route through their
//! `yes`/`no` handles, every other node has a single unlabelled successor.

use crate::node::NodeId;
use dunflow_core::EdgeId;
use serde::{Deserialize, Serialize};

/// The named branch an edge leaves a branching node through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handle {
    /// Condition held / loop body continues.
    Yes,
    /// Condition failed / loop exits.
    No,
}

impl Handle {
    /// Returns the persisted string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An edge between two nodes in a workflow graph.
///
/// The source and target node ids live in the graph structure; the edge
/// weight carries only its identity and branch handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier for this edge.
    pub id: EdgeId,
    /// The branch this edge represents, if leaving a branching node.
    #[serde(default)]
    pub handle: Option<Handle>,
}

impl Edge {
    /// Creates a new unlabelled edge (default single successor).
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: EdgeId::new(),
            handle: None,
        }
    }

    /// Creates a new edge for the given branch handle.
    #[must_use]
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            id: EdgeId::new(),
            handle: Some(handle),
        }
    }
}

impl Default for Edge {
    fn default() -> Self {
        Self::new()
    }
}

/// A complete edge reference including source and target node IDs.
///
/// This is the external representation used when a graph is listed or
/// serialized for the editor collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRef {
    /// Unique identifier for this edge.
    pub id: EdgeId,
    /// The source node ID.
    pub source: NodeId,
    /// The target node ID.
    pub target: NodeId,
    /// The branch handle, if any.
    pub handle: Option<Handle>,
}

impl EdgeRef {
    /// Creates a new edge reference.
    #[must_use]
    pub fn new(source: NodeId, target: NodeId, handle: Option<Handle>) -> Self {
        Self {
            id: EdgeId::new(),
            source,
            target,
            handle,
        }
    }
}
