//! Lifecycle callbacks and events for flow runs
//!
//! [`FlowObserver`] is the callback surface the runtime drives. Every
//! callback has a serializable [`FlowEvent`] mirror so observers can buffer
//! events or forward them to a relay.

use async_broadcast::{Receiver, Sender, TrySendError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::flow::runtime::FlowExecutionResult;
use crate::graph::model::NodeId;

/// Runtime event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    Progress {
        done: usize,
        total: usize,
    },
    NodeStarted {
        node_id: NodeId,
        title: String,
    },
    NodeCompleted {
        node_id: NodeId,
        title: String,
        value: Value,
    },
    NodeFailed {
        node_id: NodeId,
        title: String,
        message: String,
    },
    Completed {
        results: Vec<FlowExecutionResult>,
    },
    Failed {
        message: String,
    },
}

/// Event envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEventEnvelope {
    pub sequence: u64,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: FlowEvent,
}

/// Callbacks fired by the runtime, synchronously, in its own continuation.
///
/// Every method defaults to forwarding a [`FlowEvent`] to [`Self::on_event`],
/// so an observer can either override individual callbacks or handle the
/// whole stream in one place.
pub trait FlowObserver: Send + Sync {
    fn on_event(&self, _run_id: &str, _event: FlowEvent) {}

    fn on_progress(&self, run_id: &str, done: usize, total: usize) {
        self.on_event(run_id, FlowEvent::Progress { done, total });
    }

    fn on_node_start(&self, run_id: &str, node_id: NodeId, title: &str) {
        self.on_event(
            run_id,
            FlowEvent::NodeStarted {
                node_id,
                title: title.to_string(),
            },
        );
    }

    fn on_node_complete(&self, run_id: &str, node_id: NodeId, title: &str, value: &Value) {
        self.on_event(
            run_id,
            FlowEvent::NodeCompleted {
                node_id,
                title: title.to_string(),
                value: value.clone(),
            },
        );
    }

    fn on_node_error(&self, run_id: &str, node_id: NodeId, title: &str, message: &str) {
        self.on_event(
            run_id,
            FlowEvent::NodeFailed {
                node_id,
                title: title.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn on_complete(&self, run_id: &str, results: &[FlowExecutionResult]) {
        self.on_event(
            run_id,
            FlowEvent::Completed {
                results: results.to_vec(),
            },
        );
    }

    fn on_error(&self, run_id: &str, message: &str) {
        self.on_event(
            run_id,
            FlowEvent::Failed {
                message: message.to_string(),
            },
        );
    }
}

/// Observer that ignores everything
pub struct NoopObserver;

impl FlowObserver for NoopObserver {}

/// Logs every lifecycle event through `tracing`
pub struct LoggingObserver;

impl FlowObserver for LoggingObserver {
    fn on_event(&self, run_id: &str, event: FlowEvent) {
        match event {
            FlowEvent::Progress { done, total } => {
                tracing::debug!(run_id, "Progress {}/{}", done, total);
            }
            FlowEvent::NodeStarted { node_id, title } => {
                tracing::info!(run_id, "Node started: {} ({})", title, node_id);
            }
            FlowEvent::NodeCompleted { node_id, title, .. } => {
                tracing::info!(run_id, "Node completed: {} ({})", title, node_id);
            }
            FlowEvent::NodeFailed {
                node_id,
                title,
                message,
            } => {
                tracing::error!(run_id, "Node failed: {} ({}) - {}", title, node_id, message);
            }
            FlowEvent::Completed { results } => {
                let failed = results.iter().filter(|r| r.error.is_some()).count();
                tracing::info!(
                    run_id,
                    "Flow completed: {} terminal results, {} failed",
                    results.len(),
                    failed
                );
            }
            FlowEvent::Failed { message } => {
                tracing::error!(run_id, "Flow failed: {}", message);
            }
        }
    }
}

/// A buffering observer that collects events, mostly for tests
#[derive(Default)]
pub struct RecordingObserver {
    events: RwLock<Vec<FlowEventEnvelope>>,
    sequence: AtomicU64,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> Vec<FlowEventEnvelope> {
        self.events.read().clone()
    }

    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.read().iter().map(|e| e.event.clone()).collect()
    }

    /// (done, total) pairs in emission order
    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e.event {
                FlowEvent::Progress { done, total } => Some((done, total)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl FlowObserver for RecordingObserver {
    fn on_event(&self, run_id: &str, event: FlowEvent) {
        let envelope = FlowEventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            event,
        };
        self.events.write().push(envelope);
    }
}

/// Forwards events to an `async-broadcast` channel, e.g. for a WebSocket relay.
///
/// The channel runs in overflow mode: a slow subscriber loses the oldest
/// events instead of stalling the run.
pub struct BroadcastObserver {
    tx: Sender<FlowEventEnvelope>,
    sequence: AtomicU64,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> (Self, Receiver<FlowEventEnvelope>) {
        let (mut tx, rx) = async_broadcast::broadcast(capacity.max(1));
        tx.set_overflow(true);
        (
            Self {
                tx,
                sequence: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> Receiver<FlowEventEnvelope> {
        self.tx.new_receiver()
    }
}

impl FlowObserver for BroadcastObserver {
    fn on_event(&self, run_id: &str, event: FlowEvent) {
        let envelope = FlowEventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_broadcast(envelope) {
            Ok(_) => {}
            Err(TrySendError::Closed(_)) | Err(TrySendError::Inactive(_)) => {
                tracing::trace!(run_id, "No active event subscribers");
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(run_id, "Event channel full, event dropped");
            }
        }
    }
}

/// Fans callbacks out to several observers in order
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn FlowObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn FlowObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl FlowObserver for CompositeObserver {
    fn on_event(&self, run_id: &str, event: FlowEvent) {
        for observer in &self.observers {
            observer.on_event(run_id, event.clone());
        }
    }

    fn on_progress(&self, run_id: &str, done: usize, total: usize) {
        for observer in &self.observers {
            observer.on_progress(run_id, done, total);
        }
    }

    fn on_node_start(&self, run_id: &str, node_id: NodeId, title: &str) {
        for observer in &self.observers {
            observer.on_node_start(run_id, node_id, title);
        }
    }

    fn on_node_complete(&self, run_id: &str, node_id: NodeId, title: &str, value: &Value) {
        for observer in &self.observers {
            observer.on_node_complete(run_id, node_id, title, value);
        }
    }

    fn on_node_error(&self, run_id: &str, node_id: NodeId, title: &str, message: &str) {
        for observer in &self.observers {
            observer.on_node_error(run_id, node_id, title, message);
        }
    }

    fn on_complete(&self, run_id: &str, results: &[FlowExecutionResult]) {
        for observer in &self.observers {
            observer.on_complete(run_id, results);
        }
    }

    fn on_error(&self, run_id: &str, message: &str) {
        for observer in &self.observers {
            observer.on_error(run_id, message);
        }
    }
}
