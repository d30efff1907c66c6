use std::collections::HashMap;
use thiserror::Error;

use crate::graph::model::{NodeId, SocketId};

/// Unified error type for the nodeflow engine
#[derive(Debug, Error)]
pub enum FlowError {
    /// A second run was requested while one is in flight
    #[error("flow is already executing")]
    AlreadyExecuting,

    /// Every node's output is consumed by another node, so nothing can be pulled
    #[error("no terminal nodes — every node's output is consumed")]
    NoTerminalNodes,

    /// The connection list contains a dependency cycle
    #[error("dependency cycle detected through node {node_id}")]
    CycleDetected { node_id: NodeId },

    /// Structural problems found while validating a graph
    #[error("invalid graph: {message}")]
    InvalidGraph {
        message: String,
        socket: Option<SocketId>,
        node: Option<NodeId>,
    },

    /// A node references a kind that the registry does not know
    #[error("node {node_id} has an unregistered kind '{kind}'")]
    UnknownNodeKind { node_id: NodeId, kind: String },

    /// A node's config does not satisfy its behavior's schema
    #[error("invalid config for node {node_id}: {message}")]
    InvalidConfig { node_id: NodeId, message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled before its terminal nodes settled
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// Run-level failures inside the orchestration itself
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        context: HashMap<String, String>,
    },
}

impl FlowError {
    /// Create a graph validation error pointing at a socket
    pub fn invalid_socket<S: Into<String>>(message: S, socket: SocketId) -> Self {
        Self::InvalidGraph {
            message: message.into(),
            socket: Some(socket),
            node: None,
        }
    }

    /// Create a graph validation error pointing at a node
    pub fn invalid_node<S: Into<String>>(message: S, node: NodeId) -> Self {
        Self::InvalidGraph {
            message: message.into(),
            socket: None,
            node: Some(node),
        }
    }

    /// Create a configuration error with field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    /// Add context to an internal error
    pub fn with_context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        if let Self::Internal { ref mut context, .. } = self {
            context.insert(key.into(), value.into());
        }
        self
    }

    /// Structural errors abort a run before any node executes
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::NoTerminalNodes | Self::CycleDetected { .. } | Self::InvalidGraph { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::AlreadyExecuting => "concurrency",
            Self::NoTerminalNodes | Self::CycleDetected { .. } | Self::InvalidGraph { .. } => {
                "structural"
            }
            Self::UnknownNodeKind { .. } | Self::InvalidConfig { .. } => "assembly",
            Self::Configuration { .. } => "configuration",
            Self::Serialization { .. } => "serialization",
            Self::Io { .. } => "io",
            Self::Cancelled { .. } => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, FlowError>;

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for FlowError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

/// Failure of a single node, shared by every consumer of that node's value.
///
/// `origin` is the node whose behavior actually failed; downstream nodes that
/// fail only because an input failed carry the upstream origin and message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NodeError {
    pub origin: NodeId,
    pub message: String,
}

impl NodeError {
    pub fn new<S: Into<String>>(origin: NodeId, message: S) -> Self {
        Self {
            origin,
            message: message.into(),
        }
    }
}
