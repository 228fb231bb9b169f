//! Workflow Handler Registry (C7): a static mapping from declared operation
//! type to the factory that constructs a fresh handler per invocation
//! (§4.7, §9 "polymorphism over workflow handlers").

use crate::master_action_runtime::WorkflowHandler;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

type HandlerFactory = Arc<dyn Fn() -> Box<dyn WorkflowHandler> + Send + Sync>;

#[derive(Default)]
pub struct HandlerRegistry {
    factories: DashMap<String, HandlerFactory>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("operation_types", &self.factories.iter().map(|e| e.key().clone()).collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a workflow handler factory for `operation_type`. Replaces
    /// any previously-registered factory for the same key.
    pub fn register(
        &self,
        operation_type: impl Into<String>,
        factory: impl Fn() -> Box<dyn WorkflowHandler> + Send + Sync + 'static,
    ) {
        self.factories.insert(operation_type.into(), Arc::new(factory));
    }

    /// Construct a fresh handler instance for `operation_type`, or `None`
    /// if nothing is registered for it.
    pub fn resolve(&self, operation_type: &str) -> Option<Box<dyn WorkflowHandler>> {
        self.factories.get(operation_type).map(|f| f())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master_action_runtime::MasterActionContext;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct NoopHandler;

    #[async_trait]
    impl WorkflowHandler for NoopHandler {
        fn stage_names(&self) -> Vec<String> {
            vec!["only-stage".to_string()]
        }

        async fn execute(&self, _ctx: Arc<MasterActionContext>) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!({}))
        }
    }

    #[test]
    fn resolve_unknown_operation_returns_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve("Bogus").is_none());
    }

    #[test]
    fn resolve_returns_a_fresh_instance_each_call() {
        let registry = HandlerRegistry::new();
        registry.register("VerifyConfiguration", || Box::new(NoopHandler));
        assert!(registry.resolve("VerifyConfiguration").is_some());
        assert!(registry.resolve("VerifyConfiguration").is_some());
    }
}
