//! Static node-to-node view of a flow, derived from its connection list.
//!
//! Used once per run to size progress totals and to reject cyclic graphs
//! before any behavior is invoked.

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use std::collections::HashSet;
use tracing::debug;

use super::model::{FlowGraph, NodeId};
use crate::core::errors::{FlowError, Result};

#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    /// (source node, consumer node) for every connection
    adjacency: Vec<(NodeId, NodeId)>,
    dag: DiGraphMap<NodeId, ()>,
}

impl ExecutionGraph {
    pub fn build(graph: &FlowGraph) -> Self {
        let mut dag = DiGraphMap::new();
        for node in graph.nodes() {
            dag.add_node(node.id());
        }

        let mut adjacency = Vec::with_capacity(graph.connections().len());
        for connection in graph.connections() {
            let (Some(from), Some(to)) = (
                graph.owner_of(connection.from_socket),
                graph.owner_of(connection.to_socket),
            ) else {
                continue;
            };
            if dag.add_edge(from, to, ()).is_none() {
                adjacency.push((from, to));
            }
        }

        debug!(
            "Execution graph built: {} nodes, {} adjacency pairs",
            dag.node_count(),
            adjacency.len()
        );

        Self { adjacency, dag }
    }

    /// Distinct (source, consumer) node pairs
    pub fn adjacency(&self) -> &[(NodeId, NodeId)] {
        &self.adjacency
    }

    /// Number of distinct nodes appearing in any adjacency pair
    pub fn reachable_node_count(&self) -> usize {
        self.connected_nodes().len()
    }

    /// Total used for progress reporting: every connected node plus the
    /// terminal nodes, which run even when nothing is wired to them.
    pub fn progress_total(&self, terminals: &[NodeId]) -> usize {
        let mut nodes = self.connected_nodes();
        nodes.extend(terminals.iter().copied());
        nodes.len()
    }

    /// Nodes a given node directly pulls from
    pub fn dependencies(&self, node: NodeId) -> Vec<NodeId> {
        self.dag
            .neighbors_directed(node, petgraph::Direction::Incoming)
            .collect()
    }

    /// Topological order of every node, or the node where a cycle was found
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        toposort(&self.dag, None).map_err(|cycle| FlowError::CycleDetected {
            node_id: cycle.node_id(),
        })
    }

    pub fn validate_acyclic(&self) -> Result<()> {
        self.topological_order().map(|_| ())
    }

    fn connected_nodes(&self) -> HashSet<NodeId> {
        self.adjacency
            .iter()
            .flat_map(|&(from, to)| [from, to])
            .collect()
    }
}
