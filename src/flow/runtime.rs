//! Flow runtime - drives one complete run of a flow graph
//!
//! State machine: `Idle -> Running -> {Completed, Failed}`, and a finished
//! runtime accepts the next run. A cancelled run goes straight back to
//! `Idle`.
//!
//! A run pulls every terminal node through one [`NodeExecutor`], so shared
//! upstream nodes execute once. Terminal failures are recorded per node and
//! never abort the run; results are merged back into the caller's node list
//! only after every terminal has settled.

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::config::FlowConfig;
use crate::core::errors::{FlowError, Result};
use crate::flow::events::{FlowObserver, NoopObserver};
use crate::flow::executor::{ExecutionHooks, NodeExecutor, Settlement};
use crate::graph::execution_graph::ExecutionGraph;
use crate::graph::model::{FlowGraph, NodeData, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Outcome of one terminal node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowExecutionResult {
    pub node_id: NodeId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl FlowExecutionResult {
    fn from_settlement(node: &NodeData, settlement: &Settlement) -> Self {
        let (value, error) = match &settlement.output {
            Ok(output) => (Some(output.to_value()), None),
            Err(err) => (None, Some(err.message.clone())),
        };
        Self {
            node_id: node.id,
            title: node.title.clone(),
            value,
            error,
            elapsed: settlement.elapsed,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowProgress {
    pub done: usize,
    pub total: usize,
}

/// Per-run bookkeeping shared with node tasks
struct RunTracker {
    run_id: String,
    observer: Arc<dyn FlowObserver>,
    cancelled: Arc<AtomicBool>,
    cancel_notify: Notify,
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl RunTracker {
    fn new(observer: Arc<dyn FlowObserver>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            observer,
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel_notify: Notify::new(),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_one();
    }

    fn progress(&self) -> FlowProgress {
        FlowProgress {
            done: self.completed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }
}

impl ExecutionHooks for RunTracker {
    fn node_started(&self, node: &NodeData) {
        if self.is_cancelled() {
            return;
        }
        self.observer.on_node_start(&self.run_id, node.id, &node.title);
    }

    fn node_settled(&self, node: &NodeData, settlement: &Settlement) {
        if self.is_cancelled() {
            debug!(run_id = %self.run_id, "Discarding result of node {} after cancel", node.id);
            return;
        }

        match &settlement.output {
            Ok(output) => {
                self.observer
                    .on_node_complete(&self.run_id, node.id, &node.title, &output.to_value());
            }
            Err(err) => {
                self.observer
                    .on_node_error(&self.run_id, node.id, &node.title, &err.message);
            }
        }

        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        self.observer.on_progress(&self.run_id, done, total);
    }
}

struct RuntimeState {
    status: FlowStatus,
    current: Option<Arc<RunTracker>>,
}

/// Runs flow graphs, one at a time.
pub struct FlowRuntime {
    config: FlowConfig,
    observer: Arc<dyn FlowObserver>,
    state: Mutex<RuntimeState>,
}

impl FlowRuntime {
    pub fn new(config: FlowConfig) -> Self {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    pub fn with_observer(config: FlowConfig, observer: Arc<dyn FlowObserver>) -> Self {
        Self {
            config,
            observer,
            state: Mutex::new(RuntimeState {
                status: FlowStatus::Idle,
                current: None,
            }),
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn status(&self) -> FlowStatus {
        self.state.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == FlowStatus::Running
    }

    /// Progress of the current or most recent run
    pub fn progress(&self) -> FlowProgress {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|tracker| tracker.progress())
            .unwrap_or_default()
    }

    /// Id of the current or most recent run
    pub fn run_id(&self) -> Option<String> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|tracker| tracker.run_id.clone())
    }

    /// Request cancellation of the running flow.
    ///
    /// Cooperative: behaviors already in flight keep running (they can poll
    /// `NodeCtx::is_cancelled`), but they are no longer reported and their
    /// results are discarded. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        let state = self.state.lock();
        match (&state.current, state.status) {
            (Some(tracker), FlowStatus::Running) => {
                info!(run_id = %tracker.run_id, "Cancelling flow execution");
                tracker.cancel();
                true
            }
            _ => false,
        }
    }

    /// Execute every terminal node of `graph` and merge settled node results
    /// back into it.
    ///
    /// Fails immediately with [`FlowError::AlreadyExecuting`] if a run is in
    /// flight, leaving that run untouched.
    pub async fn execute(&self, graph: &mut FlowGraph) -> Result<Vec<FlowExecutionResult>> {
        let tracker = {
            let mut state = self.state.lock();
            if state.status == FlowStatus::Running {
                return Err(FlowError::AlreadyExecuting);
            }
            let tracker = Arc::new(RunTracker::new(self.observer.clone()));
            state.status = FlowStatus::Running;
            state.current = Some(tracker.clone());
            tracker
        };

        let mut guard = RunGuard {
            state: &self.state,
            tracker: tracker.clone(),
            armed: true,
        };

        match self.run(&tracker, graph).await {
            Ok(results) => {
                let status = if results.iter().all(FlowExecutionResult::is_ok) {
                    FlowStatus::Completed
                } else {
                    FlowStatus::Failed
                };
                guard.finish(status);
                info!(
                    run_id = %tracker.run_id,
                    "Flow finished with status {:?} ({} terminal results)",
                    status,
                    results.len()
                );
                self.observer.on_complete(&tracker.run_id, &results);
                Ok(results)
            }
            Err(err @ FlowError::Cancelled { .. }) => {
                guard.finish(FlowStatus::Idle);
                warn!(run_id = %tracker.run_id, "Flow execution cancelled");
                Err(err)
            }
            Err(err) => {
                guard.finish(FlowStatus::Failed);
                warn!(
                    run_id = %tracker.run_id,
                    category = err.category(),
                    "Flow execution failed: {}",
                    err
                );
                self.observer.on_error(&tracker.run_id, &err.to_string());
                Err(err)
            }
        }
    }

    #[instrument(skip_all, fields(run_id = %tracker.run_id))]
    async fn run(
        &self,
        tracker: &Arc<RunTracker>,
        graph: &mut FlowGraph,
    ) -> Result<Vec<FlowExecutionResult>> {
        let terminals = graph.terminal_nodes();
        if terminals.is_empty() {
            return Err(FlowError::NoTerminalNodes);
        }

        let execution_graph = ExecutionGraph::build(graph);
        if self.config.validate_acyclic {
            execution_graph.validate_acyclic()?;
        }

        let total = execution_graph.progress_total(&terminals);
        tracker.total.store(total, Ordering::SeqCst);
        info!(
            "Executing flow: {} terminal nodes, {} nodes expected",
            terminals.len(),
            total
        );

        let executor = NodeExecutor::new(
            tracker.run_id.clone(),
            Arc::new(graph.clone()),
            &self.config,
            tracker.clone(),
            tracker.cancelled.clone(),
        );

        let pending = join_all(terminals.iter().map(|&id| executor.execute_node(id)));
        let settlements = tokio::select! {
            settlements = pending => settlements,
            _ = tracker.cancel_notify.notified() => {
                return Err(FlowError::cancelled("flow execution"));
            }
        };
        if tracker.is_cancelled() {
            return Err(FlowError::cancelled("flow execution"));
        }

        let mut results = Vec::with_capacity(terminals.len());
        for (id, settlement) in terminals.iter().zip(settlements.iter()) {
            let node = graph.node(*id).ok_or_else(|| {
                FlowError::internal("terminal node disappeared during run")
                    .with_context("node_id", id.to_string())
            })?;
            results.push(FlowExecutionResult::from_settlement(&node.data, settlement));
        }

        let settled = executor.settled();
        debug!("Merging {} settled nodes back into the graph", settled.len());
        for (id, settlement) in settled {
            if let Some(data) = graph.node_data_mut(id) {
                match settlement.output {
                    Ok(output) => {
                        data.result = Some(output.to_value());
                        data.error = None;
                    }
                    Err(err) => {
                        data.result = None;
                        data.error = Some(err.message);
                    }
                }
                data.processing = false;
            }
        }

        Ok(results)
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new(FlowConfig::default())
    }
}

/// Resets the runtime to `Idle` if an `execute` future is dropped mid-run.
struct RunGuard<'a> {
    state: &'a Mutex<RuntimeState>,
    tracker: Arc<RunTracker>,
    armed: bool,
}

impl RunGuard<'_> {
    fn finish(&mut self, status: FlowStatus) {
        self.state.lock().status = status;
        self.armed = false;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.tracker.cancel();
            self.state.lock().status = FlowStatus::Idle;
        }
    }
}
