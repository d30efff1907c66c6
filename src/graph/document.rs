//! Serializable flow description and its assembly into a runnable graph.
//!
//! The editor hands over nodes and connections as plain data. Assembly
//! looks each node's kind up in an explicit [`BehaviorRegistry`], checks the
//! node's config against the behavior's schema when one is declared, and
//! produces a [`FlowGraph`] whose nodes carry their behaviors.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::model::{Connection, FlowGraph, Node, NodeData};
use crate::core::errors::{FlowError, Result};
use crate::flow::registry::BehaviorRegistry;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDocument {
    #[serde(default)]
    pub name: Option<String>,
    pub nodes: Vec<NodeData>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl FlowDocument {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Load from a `.json` file, or YAML for any other extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FlowError::io(format!("read flow {}", path.display()), e))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_yaml_str(&raw),
        }
    }

    /// Snapshot a graph's node data, including merged results
    pub fn from_graph(graph: &FlowGraph) -> Self {
        Self {
            name: None,
            nodes: graph.nodes().iter().map(|node| node.data.clone()).collect(),
            connections: graph.connections().to_vec(),
        }
    }

    /// Bind behaviors and build a validated graph
    pub fn assemble(self, registry: &BehaviorRegistry) -> Result<FlowGraph> {
        let mut nodes = Vec::with_capacity(self.nodes.len());

        for data in self.nodes {
            let behavior = registry
                .get(&data.kind)
                .ok_or_else(|| FlowError::UnknownNodeKind {
                    node_id: data.id,
                    kind: data.kind.clone(),
                })?;

            if let Some(schema) = behavior.config_schema() {
                validate_config(&data, &schema)?;
            }

            nodes.push(Node::new(data, behavior));
        }

        debug!(
            "Assembled flow {:?}: {} nodes, {} connections",
            self.name,
            nodes.len(),
            self.connections.len()
        );
        FlowGraph::new(nodes, self.connections)
    }
}

fn validate_config(data: &NodeData, schema: &serde_json::Value) -> Result<()> {
    let validator = jsonschema::validator_for(schema).map_err(|e| FlowError::InvalidConfig {
        node_id: data.id,
        message: format!("behavior '{}' has an invalid schema: {}", data.kind, e),
    })?;

    let messages: Vec<String> = validator
        .iter_errors(&data.config)
        .map(|e| e.to_string())
        .collect();

    if messages.is_empty() {
        Ok(())
    } else {
        Err(FlowError::InvalidConfig {
            node_id: data.id,
            message: messages.join("; "),
        })
    }
}
