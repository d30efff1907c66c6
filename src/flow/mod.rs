pub mod action;
pub mod events;
pub mod executor;
pub mod registry;
pub mod runtime;

pub use action::{FnBehavior, NodeBehavior, NodeCtx, NodeOutput};
pub use events::{
    BroadcastObserver, CompositeObserver, FlowEvent, FlowEventEnvelope, FlowObserver,
    LoggingObserver, NoopObserver, RecordingObserver,
};
pub use executor::{ExecutionHooks, NoHooks, NodeExecutor, NodeFuture, NodeResult, Settlement};
pub use registry::BehaviorRegistry;
pub use runtime::{FlowExecutionResult, FlowProgress, FlowRuntime, FlowStatus};
