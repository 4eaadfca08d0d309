//! # Task Handler Registry
//!
//! Maps `task_type` dispatch tags to handler implementations. The scheduling
//! core has no knowledge of payload semantics; collaborators register a
//! handler per task kind and the worker dispatches on the tag. An unknown tag
//! is fatal to that single task only.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::scheduler::task::Task;

/// Executes one kind of task
///
/// `handle` must be side-effect idempotent-safe: retries may re-invoke it, so
/// callers are guaranteed at-least-once, not exactly-once, semantics.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<Value>;
}

/// Adapter turning an async closure into a [`TaskHandler`]
pub struct FnTaskHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnTaskHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn handle(&self, task: &Task) -> Result<Value> {
        (self.f)(task.clone()).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnTaskHandler { f })
}

/// Thread-safe registry of task handlers keyed by dispatch tag
#[derive(Default)]
pub struct TaskHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any existing registration for the tag
    pub fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        let mut handlers = self.handlers.write();
        if handlers.insert(task_type.clone(), handler).is_some() {
            warn!(task_type = %task_type, "Handler already registered, replacing");
        } else {
            debug!(task_type = %task_type, "Handler registered");
        }
    }

    /// Resolve the handler for a dispatch tag
    pub fn resolve(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.read().contains_key(task_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Registered dispatch tags, unordered
    pub fn task_types(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::TaskRequest;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = TaskHandlerRegistry::new();
        registry.register("double", handler_fn(|task| async move {
            let n = task.payload.as_i64().unwrap_or(0);
            Ok(json!(n * 2))
        }));

        assert!(registry.contains("double"));
        assert!(!registry.contains("triple"));
        assert_eq!(registry.len(), 1);

        let handler = registry.resolve("double").unwrap();
        let task = Task::from_request(TaskRequest::new("double", json!(21)));
        let output = handler.handle(&task).await.unwrap();
        assert_eq!(output, json!(42));
    }

    #[tokio::test]
    async fn test_replacement_wins() {
        let registry = TaskHandlerRegistry::new();
        registry.register("answer", handler_fn(|_| async { Ok(json!(1)) }));
        registry.register("answer", handler_fn(|_| async { Ok(json!(2)) }));
        assert_eq!(registry.len(), 1);

        let handler = registry.resolve("answer").unwrap();
        let task = Task::from_request(TaskRequest::new("answer", Value::Null));
        assert_eq!(handler.handle(&task).await.unwrap(), json!(2));
    }
}
