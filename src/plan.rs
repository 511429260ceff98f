//! Plan module: compile graph into executable plan.

use crate::graph::{Graph, NodeId};
use crate::invariant_ppt::{assert_invariant, PLAN_SOUNDNESS};
use std::collections::VecDeque;
use thiserror::Error;

/// The compiled plan: execution order and the inputs of every node.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Live nodes, every node after all of its inputs.
    pub order: Vec<NodeId>,
    /// Inputs per node slot; empty for removed slots.
    pub inputs: Vec<Vec<NodeId>>,
    /// Graph revision this plan was compiled from.
    pub revision: u64,
}

impl Plan {
    /// Create a plan from a graph.
    pub fn compile(graph: &Graph) -> Result<Self, PlanError> {
        let order = topo_sort(graph)?;

        let mut inputs = vec![Vec::new(); graph.nodes.len()];
        for edge in &graph.edges {
            inputs[edge.to.0].push(edge.from);
        }

        assert_invariant(
            PLAN_SOUNDNESS,
            order.len() == graph.node_count(),
            "Plan schedules every live node exactly once",
            Some("compile"),
        );

        Ok(Self {
            order,
            inputs,
            revision: graph.revision(),
        })
    }

    /// Whether the plan still matches `graph`.
    pub fn is_current(&self, graph: &Graph) -> bool {
        self.revision == graph.revision()
    }
}

/// Errors during plan compilation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    /// The graph contains a cycle.
    #[error("graph contains a cycle")]
    CycleDetected,
}

/// Topological sort of live nodes (Kahn's algorithm, seeded in slot order).
fn topo_sort(graph: &Graph) -> Result<Vec<NodeId>, PlanError> {
    let mut in_degree = vec![0usize; graph.nodes.len()];
    let mut adj: Vec<Vec<NodeId>> = vec![vec![]; graph.nodes.len()];

    for edge in &graph.edges {
        adj[edge.from.0].push(edge.to);
        in_degree[edge.to.0] += 1;
    }

    let mut queue = VecDeque::new();
    for (i, slot) in graph.nodes.iter().enumerate() {
        if slot.is_some() && in_degree[i] == 0 {
            queue.push_back(NodeId(i));
        }
    }

    let mut order = Vec::with_capacity(graph.nodes.len());
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &neighbor in &adj[node.0] {
            in_degree[neighbor.0] -= 1;
            if in_degree[neighbor.0] == 0 {
                queue.push_back(neighbor);
            }
        }
    }

    if order.len() == graph.node_count() {
        Ok(order)
    } else {
        Err(PlanError::CycleDetected)
    }
}
