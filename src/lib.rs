//! nodeflow - pull-based execution engine for node graphs.
//!
//! A flow is a set of nodes wired through typed sockets. Running a flow
//! pulls every terminal node (one whose outputs nothing consumes); each node
//! resolves its inputs by executing upstream nodes through a per-run cache,
//! so a node shared by several consumers runs once.
//!
//! ```ignore
//! use nodeflow::{builtin_registry, FlowDocument, FlowRuntime};
//!
//! let mut graph = FlowDocument::from_file("flow.yaml")?.assemble(&builtin_registry())?;
//! let results = FlowRuntime::default().execute(&mut graph).await?;
//! ```

// Shared infrastructure
pub mod core;

pub mod flow; // Behaviors, executor, runtime, events
pub mod graph; // Graph model, static analysis, documents
pub mod nodes; // Built-in node behaviors

pub use crate::core::{init_tracing, FlowConfig, FlowError, NodeError, Result};
pub use flow::*;
pub use graph::*;
pub use nodes::builtin_registry;
