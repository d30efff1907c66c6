//! Node executor - recursive, cache-backed resolution of node outputs
//!
//! Each node of a run is computed at most once. The first caller of
//! [`NodeExecutor::execute_node`] spawns the node's work and stores a shared
//! handle to it in the per-run cache; every later caller, concurrent or not,
//! receives a clone of that same handle. Insertion happens under the cache
//! entry lock with no await in between, so two callers can never both miss.
//!
//! Spawned work runs to completion regardless of who is polling it, the
//! way a promise would. A node resolves all of its input sockets
//! concurrently, pulling upstream nodes through the same cache, then invokes
//! its behavior.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::core::config::FlowConfig;
use crate::core::errors::NodeError;
use crate::flow::action::{NodeCtx, NodeOutput};
use crate::graph::model::{FlowGraph, NodeData, NodeId, SocketId};

pub type NodeResult = std::result::Result<NodeOutput, NodeError>;

/// Final state of one node's execution
#[derive(Debug, Clone)]
pub struct Settlement {
    pub output: NodeResult,
    /// Time from the node's first request to its settlement, inputs included
    pub elapsed: Duration,
}

/// Shared handle to a node's in-flight or settled execution
pub type NodeFuture = Shared<BoxFuture<'static, Settlement>>;

/// Notifications about node lifecycle, fired from inside node tasks
pub trait ExecutionHooks: Send + Sync {
    /// Inputs are resolved and the behavior is about to be invoked
    fn node_started(&self, _node: &NodeData) {}

    /// The node's execution settled, successfully or not
    fn node_settled(&self, _node: &NodeData, _settlement: &Settlement) {}
}

/// Hooks that ignore every notification
pub struct NoHooks;

impl ExecutionHooks for NoHooks {}

/// Per-run executor; clones share the same cache.
#[derive(Clone)]
pub struct NodeExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    run_id: String,
    graph: Arc<FlowGraph>,
    cache: DashMap<NodeId, NodeFuture>,
    hooks: Arc<dyn ExecutionHooks>,
    cancelled: Arc<AtomicBool>,
    limiter: Option<Arc<Semaphore>>,
    node_timeout: Option<Duration>,
}

impl NodeExecutor {
    pub fn new(
        run_id: impl Into<String>,
        graph: Arc<FlowGraph>,
        config: &FlowConfig,
        hooks: Arc<dyn ExecutionHooks>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                run_id: run_id.into(),
                graph,
                cache: DashMap::new(),
                hooks,
                cancelled,
                limiter: config
                    .max_concurrent_behaviors
                    .map(|limit| Arc::new(Semaphore::new(limit))),
                node_timeout: config.node_timeout(),
            }),
        }
    }

    /// Shared future of a node's execution, starting it on first request.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute_node(&self, node_id: NodeId) -> NodeFuture {
        match self.inner.cache.entry(node_id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                debug!(run_id = %self.inner.run_id, "Scheduling node {}", node_id);
                let executor = self.clone();
                let handle = tokio::spawn(async move { executor.run_node(node_id).await });
                let started = Instant::now();
                let future = async move {
                    match handle.await {
                        Ok(settlement) => settlement,
                        Err(e) => Settlement {
                            output: Err(NodeError::new(
                                node_id,
                                format!("node task aborted: {}", e),
                            )),
                            elapsed: started.elapsed(),
                        },
                    }
                }
                .boxed()
                .shared();
                entry.insert(future.clone());
                future
            }
        }
    }

    /// Value delivered to an input socket.
    ///
    /// Returns `Ok(None)` without executing anything when no connection
    /// targets `socket`. Otherwise executes (or reuses) the source node and
    /// projects its output onto the connected output socket.
    pub async fn resolve_input(&self, socket: SocketId) -> Result<Option<Value>, NodeError> {
        let graph = &self.inner.graph;
        let Some(connection) = graph.connection_to(socket) else {
            return Ok(None);
        };

        let from_socket = connection.from_socket;
        let source = graph.owner_of(from_socket).ok_or_else(|| {
            let consumer = graph.owner_of(socket).unwrap_or(NodeId(0));
            NodeError::new(consumer, format!("socket {} has no owning node", from_socket))
        })?;

        let settlement = self.execute_node(source).await;
        settlement.output.map(|output| output.project(from_socket))
    }

    /// Number of nodes requested so far in this run
    pub fn requested(&self) -> usize {
        self.inner.cache.len()
    }

    /// Every node whose execution has settled, with its settlement
    pub fn settled(&self) -> Vec<(NodeId, Settlement)> {
        self.inner
            .cache
            .iter()
            .filter_map(|entry| entry.value().peek().map(|s| (*entry.key(), s.clone())))
            .collect()
    }

    async fn run_node(&self, node_id: NodeId) -> Settlement {
        let started = Instant::now();
        let output = self.compute(node_id).await;
        let settlement = Settlement {
            output,
            elapsed: started.elapsed(),
        };

        if let Some(node) = self.inner.graph.node(node_id) {
            self.inner.hooks.node_settled(&node.data, &settlement);
        }
        settlement
    }

    async fn compute(&self, node_id: NodeId) -> NodeResult {
        let inner = &self.inner;
        let node = inner
            .graph
            .node(node_id)
            .ok_or_else(|| NodeError::new(node_id, format!("node {} not found", node_id)))?;

        let sockets: Vec<SocketId> = node.data.inputs().map(|s| s.id).collect();
        let resolved = join_all(sockets.iter().map(|&socket| self.resolve_input(socket))).await;

        let mut inputs = HashMap::with_capacity(sockets.len());
        for (socket, value) in sockets.into_iter().zip(resolved) {
            if let Some(value) = value? {
                inputs.insert(socket, value);
            }
        }

        if inner.cancelled.load(Ordering::SeqCst) {
            return Err(NodeError::new(node_id, "run cancelled"));
        }

        let mut snapshot = node.data.clone();
        snapshot.processing = true;
        let ctx = NodeCtx::new(
            inner.run_id.clone(),
            snapshot,
            inputs,
            inner.cancelled.clone(),
        );

        let _permit = match &inner.limiter {
            Some(limiter) => Some(limiter.clone().acquire_owned().await.map_err(|_| {
                NodeError::new(node_id, "behavior limiter closed")
            })?),
            None => None,
        };

        inner.hooks.node_started(&node.data);
        let invocation = AssertUnwindSafe(node.behavior.process(&ctx)).catch_unwind();

        let outcome = match inner.node_timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(run_id = %inner.run_id, "Node {} timed out", node_id);
                    return Err(NodeError::new(
                        node_id,
                        format!("node timed out after {}s", limit.as_secs()),
                    ));
                }
            },
            None => invocation.await,
        };

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(NodeError::new(node_id, err.to_string())),
            Err(_) => Err(NodeError::new(node_id, "node behavior panicked")),
        }
    }
}
