//! # Pipeline Stages
//!
//! A stage is a named step with its own validation, transformation,
//! processing, recovery, timeout, and retry policy. The handler trait follows
//! the step-handler foundation: implementors override `process` and opt into
//! the other hooks, which default to pass-through behavior.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::pipeline::context::PipelineContext;

/// Business logic of one pipeline stage
///
/// `process` must be side-effect idempotent-safe: the engine retries failed
/// attempts, so implementations see at-least-once, not exactly-once,
/// invocation semantics.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Transform the stage input into the stage output
    async fn process(&self, input: Value, context: &PipelineContext) -> Result<Value>;

    /// Reject unacceptable input before `transform`/`process` run
    ///
    /// A rejection counts as a stage failure and consumes a retry attempt.
    async fn validate(&self, _input: &Value) -> Result<()> {
        Ok(())
    }

    /// Reshape the input ahead of `process`
    async fn transform(&self, input: Value) -> Result<Value> {
        Ok(input)
    }

    /// Last-resort recovery once retries are exhausted
    ///
    /// Returning `Some(value)` makes `value` the stage output and the run
    /// continues; `None` aborts the run.
    async fn on_error(&self, _error: &crate::error::ConductorError, _input: &Value) -> Option<Value> {
        None
    }
}

/// Static policy for one stage
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Unique within a pipeline
    pub name: String,
    /// Deadline for one `process` attempt
    pub timeout: Option<Duration>,
    /// Retry bound; falls back to the pipeline-wide default when `None`
    pub max_retries: Option<u32>,
    /// Submit `process` as a task to the bound processor instead of running inline
    pub concurrent: bool,
}

impl StageConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            max_retries: None,
            concurrent: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }
}

/// A registered stage: policy plus handler
///
/// Immutable once registered; a pipeline holds an ordered list of these.
#[derive(Clone)]
pub struct Stage {
    pub config: StageConfig,
    pub handler: Arc<dyn StageHandler>,
}

impl Stage {
    pub fn new(config: StageConfig, handler: Arc<dyn StageHandler>) -> Self {
        Self { config, handler }
    }

    /// Convenience constructor for a stage whose body is a plain async closure
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            config: StageConfig::new(name),
            handler: Arc::new(FnStage { f }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("config", &self.config).finish()
    }
}

/// Adapter turning an async closure into a [`StageHandler`]
pub struct FnStage<F> {
    f: F,
}

impl<F> FnStage<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> StageHandler for FnStage<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn process(&self, input: Value, _context: &PipelineContext) -> Result<Value> {
        (self.f)(input).await
    }
}
