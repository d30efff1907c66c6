// Built-in node behaviors

pub mod text;

pub use text::register_text_nodes;

use crate::flow::registry::BehaviorRegistry;

/// Registry pre-loaded with every built-in node kind
pub fn builtin_registry() -> BehaviorRegistry {
    let registry = BehaviorRegistry::new();
    register_text_nodes(&registry);
    registry
}
