// Shared infrastructure: errors, configuration, logging setup

pub mod config;
pub mod errors;
pub mod telemetry;

pub use config::FlowConfig;
pub use errors::{FlowError, NodeError, Result};
pub use telemetry::init_tracing;
