//! Graph model: nodes, sockets and connections of one run.
//!
//! A [`FlowGraph`] is handed to the runtime as a snapshot. Node data
//! ([`NodeData`]) is plain, serializable state; the capability that computes
//! a node's output ([`NodeBehavior`]) is bound once when the [`Node`] is
//! constructed and never carried in the data itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::core::errors::{FlowError, Result};
use crate::flow::action::NodeBehavior;

/// Identifier of a node, unique within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

/// Identifier of a socket, unique across every node of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketDirection {
    Input,
    Output,
}

/// A directional, optionally typed connection point on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Socket {
    pub id: SocketId,
    pub direction: SocketDirection,
    pub owner: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Socket {
    pub fn is_input(&self) -> bool {
        self.direction == SocketDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == SocketDirection::Output
    }
}

/// Directed edge from an output socket to an input socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from_socket: SocketId,
    pub to_socket: SocketId,
}

impl Connection {
    pub fn new(from_socket: SocketId, to_socket: SocketId) -> Self {
        Self {
            from_socket,
            to_socket,
        }
    }
}

/// Static description of a node plus the fields refreshed after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: NodeId,
    pub title: String,
    /// Registry key used to bind a behavior at assembly time
    pub kind: String,
    #[serde(default)]
    pub sockets: Vec<Socket>,
    #[serde(default)]
    pub config: Value,
    /// Value of the last settled run, merged back by the runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message of the last settled run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on the snapshot a behavior sees while it runs; the runtime
    /// clears it when merging results back
    #[serde(default)]
    pub processing: bool,
}

impl NodeData {
    pub fn new(id: u64, title: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: NodeId(id),
            title: title.into(),
            kind: kind.into(),
            sockets: Vec::new(),
            config: Value::Null,
            result: None,
            error: None,
            processing: false,
        }
    }

    /// Add an input socket
    pub fn with_input(mut self, socket: u64) -> Self {
        self.sockets.push(Socket {
            id: SocketId(socket),
            direction: SocketDirection::Input,
            owner: self.id,
            data_type: None,
            title: None,
        });
        self
    }

    /// Add an output socket
    pub fn with_output(mut self, socket: u64) -> Self {
        self.sockets.push(Socket {
            id: SocketId(socket),
            direction: SocketDirection::Output,
            owner: self.id,
            data_type: None,
            title: None,
        });
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Socket> {
        self.sockets.iter().filter(|s| s.is_input())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Socket> {
        self.sockets.iter().filter(|s| s.is_output())
    }
}

/// A node ready to run: its data and the behavior bound to its kind.
#[derive(Clone)]
pub struct Node {
    pub data: NodeData,
    pub behavior: Arc<dyn NodeBehavior>,
}

impl Node {
    pub fn new(data: NodeData, behavior: Arc<dyn NodeBehavior>) -> Self {
        Self { data, behavior }
    }

    pub fn id(&self) -> NodeId {
        self.data.id
    }

    pub fn title(&self) -> &str {
        &self.data.title
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("data", &self.data)
            .field("behavior", &self.behavior.name())
            .finish()
    }
}

/// Nodes and connections of one run, indexed for socket lookups.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    nodes: Vec<Node>,
    connections: Vec<Connection>,
    node_index: HashMap<NodeId, usize>,
    sockets: HashMap<SocketId, Socket>,
    /// input socket -> connection index
    incoming: HashMap<SocketId, usize>,
    /// output sockets consumed by at least one connection
    consumed: HashSet<SocketId>,
}

impl FlowGraph {
    /// Build a graph and check the invariants the engine relies on: unique
    /// node and socket ids, connections running output -> input between
    /// known sockets, and at most one connection per input socket.
    pub fn new(nodes: Vec<Node>, connections: Vec<Connection>) -> Result<Self> {
        let mut node_index = HashMap::with_capacity(nodes.len());
        let mut sockets = HashMap::new();

        for (idx, node) in nodes.iter().enumerate() {
            if node_index.insert(node.id(), idx).is_some() {
                return Err(FlowError::invalid_node("duplicate node id", node.id()));
            }
            for socket in &node.data.sockets {
                if socket.owner != node.id() {
                    return Err(FlowError::invalid_socket(
                        format!("socket is owned by node {} but declared on node {}", socket.owner, node.id()),
                        socket.id,
                    ));
                }
                if sockets.insert(socket.id, socket.clone()).is_some() {
                    return Err(FlowError::invalid_socket("duplicate socket id", socket.id));
                }
            }
        }

        let mut incoming = HashMap::with_capacity(connections.len());
        let mut consumed = HashSet::with_capacity(connections.len());

        for (idx, connection) in connections.iter().enumerate() {
            let from = sockets.get(&connection.from_socket).ok_or_else(|| {
                FlowError::invalid_socket("connection starts at an unknown socket", connection.from_socket)
            })?;
            let to = sockets.get(&connection.to_socket).ok_or_else(|| {
                FlowError::invalid_socket("connection ends at an unknown socket", connection.to_socket)
            })?;
            if !from.is_output() {
                return Err(FlowError::invalid_socket(
                    "connection must start at an output socket",
                    from.id,
                ));
            }
            if !to.is_input() {
                return Err(FlowError::invalid_socket(
                    "connection must end at an input socket",
                    to.id,
                ));
            }
            if incoming.insert(to.id, idx).is_some() {
                return Err(FlowError::invalid_socket(
                    "input socket has more than one incoming connection",
                    to.id,
                ));
            }
            consumed.insert(from.id);
        }

        Ok(Self {
            nodes,
            connections,
            node_index,
            sockets,
            incoming,
            consumed,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.node_index.get(&id).map(|&idx| &self.nodes[idx])
    }

    pub(crate) fn node_data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        let idx = *self.node_index.get(&id)?;
        Some(&mut self.nodes[idx].data)
    }

    pub fn socket(&self, id: SocketId) -> Option<&Socket> {
        self.sockets.get(&id)
    }

    /// Node owning a socket
    pub fn owner_of(&self, socket: SocketId) -> Option<NodeId> {
        self.sockets.get(&socket).map(|s| s.owner)
    }

    /// The connection terminating at `socket`, if any
    pub fn connection_to(&self, socket: SocketId) -> Option<&Connection> {
        self.incoming.get(&socket).map(|&idx| &self.connections[idx])
    }

    /// A node is terminal when nothing downstream consumes any of its outputs.
    pub fn is_terminal(&self, id: NodeId) -> bool {
        match self.node(id) {
            Some(node) => node.data.outputs().all(|s| !self.consumed.contains(&s.id)),
            None => false,
        }
    }

    /// Terminal nodes in node-list order
    pub fn terminal_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .map(Node::id)
            .filter(|&id| self.is_terminal(id))
            .collect()
    }
}
