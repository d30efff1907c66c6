//! Node behaviors - compute-only capabilities bound to node kinds
//!
//! A behavior receives a fully resolved [`NodeCtx`] and produces a
//! [`NodeOutput`]. It never sees or mutates the graph.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::graph::model::{NodeData, SocketId};

/// Context for one behavior invocation (immutable, clonable)
#[derive(Debug, Clone)]
pub struct NodeCtx {
    /// Run this invocation belongs to
    pub run_id: String,
    /// Snapshot of the node being processed
    pub node: NodeData,
    /// Resolved value per input socket; unconnected inputs are absent
    inputs: HashMap<SocketId, Value>,
    cancelled: Arc<AtomicBool>,
}

impl NodeCtx {
    pub fn new(
        run_id: impl Into<String>,
        node: NodeData,
        inputs: HashMap<SocketId, Value>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            node,
            inputs,
            cancelled,
        }
    }

    /// Value delivered to an input socket, or `None` when nothing is wired
    /// to it or the upstream produced no value for that socket.
    pub fn get_input_value(&self, socket: SocketId) -> Option<&Value> {
        self.inputs.get(&socket)
    }

    /// Input values in socket declaration order
    pub fn input_values(&self) -> Vec<Option<&Value>> {
        self.node
            .inputs()
            .map(|socket| self.inputs.get(&socket.id))
            .collect()
    }

    /// Value of the first declared input socket
    pub fn first_input(&self) -> Option<&Value> {
        self.node
            .inputs()
            .next()
            .and_then(|socket| self.inputs.get(&socket.id))
    }

    /// Get a config value by key
    pub fn config<T: serde::de::DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .node
            .config
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Config '{}' not found", key))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("Failed to deserialize config '{}': {}", key, e))
    }

    /// Get an optional config value
    pub fn config_opt<T: serde::de::DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.node.config.get(key) {
            Some(value) if !value.is_null() => {
                let parsed = serde_json::from_value(value.clone())
                    .map_err(|e| anyhow::anyhow!("Failed to deserialize config '{}': {}", key, e))?;
                Ok(Some(parsed))
            }
            _ => Ok(None),
        }
    }

    /// Whether the run was cancelled; long-running behaviors may stop early
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What a behavior produced.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// One value, delivered on every output socket of the node
    Value(Value),
    /// Per-socket values; a socket missing from the map has no value
    Sockets(BTreeMap<SocketId, Value>),
}

impl NodeOutput {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn sockets<I, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (SocketId, V)>,
        V: Into<Value>,
    {
        Self::Sockets(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
    }

    /// Value seen by a consumer wired to `socket`
    pub fn project(&self, socket: SocketId) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value.clone()),
            Self::Sockets(map) => map.get(&socket).cloned(),
        }
    }

    /// Flatten into a single JSON value for results and events
    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Sockets(map) => Value::Object(
                map.iter()
                    .map(|(socket, value)| (socket.to_string(), value.clone()))
                    .collect(),
            ),
        }
    }
}

/// NodeBehavior - the capability behind a node kind
#[async_trait]
pub trait NodeBehavior: Send + Sync {
    /// Kind name this behavior is registered under
    fn name(&self) -> &str;

    /// Compute the node's output from its resolved inputs and config
    async fn process(&self, ctx: &NodeCtx) -> anyhow::Result<NodeOutput>;

    /// Optional: JSON schema the node's config must satisfy at assembly time
    fn config_schema(&self) -> Option<Value> {
        None
    }
}

/// Adapter turning an async closure into a behavior
pub struct FnBehavior<F> {
    name: String,
    func: F,
}

impl<F, Fut> FnBehavior<F>
where
    F: Fn(NodeCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<NodeOutput>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> NodeBehavior for FnBehavior<F>
where
    F: Fn(NodeCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<NodeOutput>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, ctx: &NodeCtx) -> anyhow::Result<NodeOutput> {
        (self.func)(ctx.clone()).await
    }
}
