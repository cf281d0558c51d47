//! Structural validation of workflow graphs.
//!
//! Validation collects every violation rather than stopping at the first,
//! attaching the offending node where one exists. The host refuses to
//! activate a workflow whose graph reports any violation; the engine also
//! re-validates before starting an execution so a snapshot taken from a
//! stale draft cannot run.

use crate::edge::Handle;
use crate::error::ValidationError;
use crate::graph::WorkflowGraph;
use crate::node::{NodeConfig, NodeId, NodeKind};
use petgraph::algo::tarjan_scc;
use petgraph::visit::{Dfs, EdgeRef};
use std::collections::HashSet;

/// Validates a workflow graph, returning every structural violation.
#[must_use]
pub fn validate(graph: &WorkflowGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let entry = check_entry(graph, &mut errors);
    check_reachability(graph, entry, &mut errors);
    check_branches(graph, &mut errors);
    check_cycles(graph, &mut errors);

    errors
}

/// Checks that exactly one entry node exists and that it is a trigger.
fn check_entry(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) -> Option<NodeId> {
    let entries = graph.entry_nodes();
    match entries.as_slice() {
        [] => {
            errors.push(ValidationError::NoEntryNode);
            None
        }
        [entry] => {
            if entry.kind() != NodeKind::Trigger {
                errors.push(ValidationError::EntryNotTrigger { node_id: entry.id });
            }
            Some(entry.id)
        }
        many => {
            errors.push(ValidationError::MultipleEntryNodes {
                node_ids: many.iter().map(|n| n.id).collect(),
            });
            None
        }
    }
}

/// Checks that every node is reachable from the entry node.
fn check_reachability(
    graph: &WorkflowGraph,
    entry: Option<NodeId>,
    errors: &mut Vec<ValidationError>,
) {
    let Some(entry) = entry else {
        return;
    };
    let Some(start) = graph.index_of(entry) else {
        return;
    };

    let inner = graph.inner();
    let mut reached = HashSet::new();
    let mut dfs = Dfs::new(inner, start);
    while let Some(index) = dfs.next(inner) {
        if let Some(node) = inner.node_weight(index) {
            reached.insert(node.id);
        }
    }

    for node in graph.nodes() {
        if !reached.contains(&node.id) {
            errors.push(ValidationError::Unreachable { node_id: node.id });
        }
    }
}

/// Checks branching nodes carry exactly a `yes` and a `no` edge, plain nodes
/// at most one successor, and terminal nodes none.
fn check_branches(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    for node in graph.nodes() {
        let successors = graph.successors(node.id);

        if node.config.is_branching() {
            let mut seen = HashSet::new();
            let mut well_formed = true;
            for (_, edge) in &successors {
                match edge.handle {
                    Some(handle) if seen.insert(handle) => {}
                    _ => well_formed = false,
                }
            }
            if !well_formed || successors.len() > 2 {
                errors.push(ValidationError::ExtraBranch { node_id: node.id });
            }
            for handle in [Handle::Yes, Handle::No] {
                if !seen.contains(&handle) {
                    errors.push(ValidationError::MissingBranch {
                        node_id: node.id,
                        handle,
                    });
                }
            }
        } else if node.kind() == NodeKind::EndFlow {
            if !successors.is_empty() {
                errors.push(ValidationError::TerminalSuccessor { node_id: node.id });
            }
        } else if successors.len() > 1 {
            errors.push(ValidationError::AmbiguousSuccessor { node_id: node.id });
        }

        if let NodeConfig::Loop(config) = &node.config {
            if config.max_iterations == 0 {
                errors.push(ValidationError::InvalidLoopCap { node_id: node.id });
            }
        }
    }
}

/// Checks that every cycle passes through a loop node.
///
/// Strongly connected components with more than one node (or a self-edge)
/// are the graph's cycles; each must contain at least one loop node so the
/// iteration counter bounds it.
fn check_cycles(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let inner = graph.inner();

    for component in tarjan_scc(inner) {
        let cyclic = component.len() > 1
            || component.iter().any(|&index| {
                inner.edges(index).any(|edge| edge.target() == index)
            });
        if !cyclic {
            continue;
        }

        let nodes: Vec<_> = component
            .iter()
            .filter_map(|&index| inner.node_weight(index))
            .collect();

        let has_loop = nodes
            .iter()
            .any(|node| matches!(node.config, NodeConfig::Loop(_)));
        if !has_loop {
            errors.push(ValidationError::UnguardedCycle {
                node_ids: nodes.iter().map(|n| n.id).collect(),
            });
        }
    }
}
