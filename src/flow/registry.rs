//! Registry mapping node kinds to behaviors
//!
//! The registry is an explicit value handed to whatever assembles graphs.
//! The execution engine never consults it: it only sees nodes that already
//! carry their behavior.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::flow::action::NodeBehavior;

#[derive(Clone)]
pub struct BehaviorRegistry {
    behaviors: Arc<RwLock<HashMap<String, Arc<dyn NodeBehavior>>>>,
}

impl BehaviorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            behaviors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a behavior under its own name, replacing any previous one
    pub fn register(&self, behavior: Arc<dyn NodeBehavior>) {
        let mut behaviors = self.behaviors.write();
        behaviors.insert(behavior.name().to_string(), behavior);
    }

    /// Get a behavior by kind
    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeBehavior>> {
        self.behaviors.read().get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.behaviors.read().contains_key(kind)
    }

    /// List all registered kinds, sorted
    pub fn list(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.behaviors.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
