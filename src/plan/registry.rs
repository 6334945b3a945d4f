use std::collections::BTreeMap;

use crate::node::behavior::{OpError, Operations};

/// Registry of named node behaviors that run specifications can refer to.
pub struct BehaviorRegistry {
    behaviors: BTreeMap<String, Operations>,
}

impl BehaviorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            behaviors: BTreeMap::new(),
        }
    }

    /// Create a registry with the built-in behaviors, useful for dry runs:
    /// `noop`, `fail-start`, `fail-run` and `fail-stop`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("noop", Operations::new());
        registry.register(
            "fail-start",
            Operations::new().on_start(|ctx| async move {
                Err(OpError::failed(format!("{} refused to start", ctx.id())))
            }),
        );
        registry.register(
            "fail-run",
            Operations::new().on_run(|ctx, _handles| async move {
                Err(OpError::failed(format!("{} failed its run", ctx.id())))
            }),
        );
        registry.register(
            "fail-stop",
            Operations::new().on_stop(|ctx| async move {
                Err(OpError::failed(format!("{} failed to stop", ctx.id())))
            }),
        );
        registry
    }

    /// Look up a behavior by name.
    pub fn get(&self, name: &str) -> Option<&Operations> {
        self.behaviors.get(name)
    }

    /// List all registered behavior names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.behaviors.keys().map(String::as_str).collect()
    }

    /// Register a behavior, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, operations: Operations) {
        self.behaviors.insert(name.into(), operations);
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
