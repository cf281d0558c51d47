//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed graphs where:
//! - Nodes are workflow steps (trigger, message, condition, ...)
//! - Edges connect a node to its successors, optionally tagged with a
//!   `yes`/`no` handle for branching nodes
//!
//! The graph structure is stored as JSONB in the database for flexible
//! schema evolution, and snapshotted into every execution at creation time.

use crate::edge::{Edge, EdgeRef, Handle};
use crate::error::GraphError;
use crate::node::{Node, NodeId};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// The underlying directed graph.
    #[serde(with = "graph_serde")]
    graph: DiGraph<Node, Edge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    #[serde(skip)]
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index_map: HashMap::new(),
        }
    }

    /// Adds a node to the graph.
    ///
    /// Returns the node ID.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let node_id = node.id;
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id, index);
        node_id
    }

    /// Removes a node from the graph.
    ///
    /// Also removes all edges connected to this node.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let index = self.node_index_map.remove(&node_id)?;
        let node = self.graph.remove_node(index);
        // Removal invalidates indices of the last node, so rebuild.
        self.rebuild_index_map();
        node
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(&node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns true if the graph contains the node.
    #[must_use]
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.node_index_map.contains_key(&node_id)
    }

    /// Adds an edge between two nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Source or target node doesn't exist
    /// - The source is a branching node and the edge has no handle, or the
    ///   handle is already taken
    /// - The source is a non-branching node and already has a successor, or
    ///   the edge carries a handle
    pub fn add_edge(
        &mut self,
        source_id: NodeId,
        target_id: NodeId,
        edge: Edge,
    ) -> Result<(), GraphError> {
        let source_index = *self
            .node_index_map
            .get(&source_id)
            .ok_or(GraphError::NodeNotFound { node_id: source_id })?;

        let target_index = *self
            .node_index_map
            .get(&target_id)
            .ok_or(GraphError::NodeNotFound { node_id: target_id })?;

        let source_node = self
            .graph
            .node_weight(source_index)
            .ok_or(GraphError::NodeNotFound { node_id: source_id })?;

        if source_node.config.is_branching() {
            let Some(handle) = edge.handle else {
                return Err(GraphError::HandleRequired { node_id: source_id });
            };
            let taken = self
                .graph
                .edges_directed(source_index, Direction::Outgoing)
                .any(|e| e.weight().handle == Some(handle));
            if taken {
                return Err(GraphError::DuplicateHandle {
                    node_id: source_id,
                    handle,
                });
            }
        } else {
            if edge.handle.is_some() {
                return Err(GraphError::UnexpectedHandle { node_id: source_id });
            }
            let has_successor = self
                .graph
                .edges_directed(source_index, Direction::Outgoing)
                .next()
                .is_some();
            if has_successor {
                return Err(GraphError::SuccessorExists { node_id: source_id });
            }
        }

        self.graph.add_edge(source_index, target_index, edge);
        Ok(())
    }

    /// Returns all nodes in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns all edges as external references.
    #[must_use]
    pub fn edges(&self) -> Vec<EdgeRef> {
        self.graph
            .edge_references()
            .filter_map(|e| {
                let source = self.graph.node_weight(e.source())?.id;
                let target = self.graph.node_weight(e.target())?.id;
                Some(EdgeRef {
                    id: e.weight().id,
                    source,
                    target,
                    handle: e.weight().handle,
                })
            })
            .collect()
    }

    /// Returns nodes that have no incoming edges (entry points).
    pub fn entry_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Incoming).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns the unique entry node of the graph.
    ///
    /// # Errors
    ///
    /// Returns an error when the graph has no entry node or more than one.
    pub fn entry_node(&self) -> Result<&Node, GraphError> {
        let entries = self.entry_nodes();
        match entries.len() {
            1 => Ok(entries[0]),
            0 => Err(GraphError::NoEntryNode),
            _ => Err(GraphError::MultipleEntryNodes {
                node_ids: entries.iter().map(|n| n.id).collect(),
            }),
        }
    }

    /// Returns the successors (downstream nodes) of a given node.
    pub fn successors(&self, node_id: NodeId) -> Vec<(&Node, &Edge)> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };

        self.graph
            .edges_directed(index, Direction::Outgoing)
            .filter_map(|edge| {
                let target = self.graph.node_weight(edge.target())?;
                Some((target, edge.weight()))
            })
            .collect()
    }

    /// Returns the successor reached through the given handle.
    ///
    /// A `None` handle selects the default (unlabelled) successor.
    #[must_use]
    pub fn successor_via(&self, node_id: NodeId, handle: Option<Handle>) -> Option<&Node> {
        self.successors(node_id)
            .into_iter()
            .find(|(_, edge)| edge.handle == handle)
            .map(|(node, _)| node)
    }

    /// Returns the predecessors (upstream nodes) of a given node.
    pub fn predecessors(&self, node_id: NodeId) -> Vec<(&Node, &Edge)> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };

        self.graph
            .edges_directed(index, Direction::Incoming)
            .filter_map(|edge| {
                let source = self.graph.node_weight(edge.source())?;
                Some((source, edge.weight()))
            })
            .collect()
    }

    /// Rebuilds the node index map after deserialization.
    pub fn rebuild_index_map(&mut self) {
        self.node_index_map.clear();
        for index in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(index) {
                self.node_index_map.insert(node.id, index);
            }
        }
    }

    /// Returns the underlying petgraph structure for traversal algorithms.
    pub(crate) fn inner(&self) -> &DiGraph<Node, Edge> {
        &self.graph
    }

    /// Returns the petgraph index for a node id.
    pub(crate) fn index_of(&self, node_id: NodeId) -> Option<NodeIndex> {
        self.node_index_map.get(&node_id).copied()
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Custom serde for petgraph DiGraph.
mod graph_serde {
    use super::*;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeStruct;

    pub fn serialize<S>(graph: &DiGraph<Node, Edge>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let nodes: Vec<_> = graph.node_weights().cloned().collect();
        let edges: Vec<_> = graph
            .edge_references()
            .map(|e| {
                let source_id = graph.node_weight(e.source()).map(|n| n.id);
                let target_id = graph.node_weight(e.target()).map(|n| n.id);
                (source_id, target_id, e.weight().clone())
            })
            .collect();

        let mut state = serializer.serialize_struct("Graph", 2)?;
        state.serialize_field("nodes", &nodes)?;
        state.serialize_field("edges", &edges)?;
        state.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DiGraph<Node, Edge>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        type EdgeTuple = (Option<NodeId>, Option<NodeId>, Edge);

        struct GraphVisitor;

        impl<'de> Visitor<'de> for GraphVisitor {
            type Value = DiGraph<Node, Edge>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a workflow graph with nodes and edges")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut nodes: Option<Vec<Node>> = None;
                let mut edges: Option<Vec<EdgeTuple>> = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "nodes" => nodes = Some(map.next_value()?),
                        "edges" => edges = Some(map.next_value()?),
                        _ => {
                            let _ = map.next_value::<serde::de::IgnoredAny>()?;
                        }
                    }
                }

                let nodes = nodes.unwrap_or_default();
                let edges = edges.unwrap_or_default();

                let mut graph = DiGraph::new();
                let mut id_to_index = HashMap::new();

                for node in nodes {
                    let id = node.id;
                    let index = graph.add_node(node);
                    id_to_index.insert(id, index);
                }

                for (source_id, target_id, edge) in edges {
                    let (Some(source), Some(target)) = (source_id, target_id) else {
                        continue;
                    };
                    let (Some(&source_idx), Some(&target_idx)) =
                        (id_to_index.get(&source), id_to_index.get(&target))
                    else {
                        continue;
                    };
                    graph.add_edge(source_idx, target_idx, edge);
                }

                Ok(graph)
            }
        }

        deserializer.deserialize_struct("Graph", &["nodes", "edges"], GraphVisitor)
    }
}
