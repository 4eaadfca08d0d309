#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conductor Core
//!
//! Concurrent task scheduling and staged pipeline execution engine.
//!
//! ## Overview
//!
//! Conductor Core provides two composable execution surfaces:
//!
//! - A **scheduling core**: a priority- and dependency-aware
//!   [`TaskQueue`](scheduler::TaskQueue) drained by a self-healing
//!   [`WorkerPool`](scheduler::WorkerPool), orchestrated by a
//!   [`ConcurrentProcessor`](scheduler::ConcurrentProcessor) that exposes a
//!   submit-now/complete-later API with metrics and typed lifecycle events.
//! - A **pipeline engine**: an ordered list of
//!   [`Stage`](pipeline::Stage)s executed per input with per-stage
//!   validation, transformation, timeouts, retries, and error recovery, in
//!   sequential, streaming, and concurrency-limited batch modes.
//!
//! The two compose: a stage marked `concurrent` is submitted to a bound
//! processor as a task, gaining worker isolation and crash recovery.
//!
//! Payloads are opaque JSON; collaborators register a
//! [`TaskHandler`](registry::TaskHandler) per task kind and the worker
//! dispatches on the task's type tag. The engine has no knowledge of payload
//! semantics.
//!
//! ## Module Organization
//!
//! - [`scheduler`] - task queue, worker pool, parallel batch runner, processor
//! - [`pipeline`] - stages, contexts, and the workflow pipeline engine
//! - [`registry`] - task handler registration and dispatch
//! - [`events`] - typed lifecycle event publishing
//! - [`config`] - configuration with environment overrides
//! - [`error`] - structured error handling
//! - [`logging`] - tracing initialization
//!
//! ## Quick Start
//!
//! ```rust
//! use conductor_core::{ConcurrentProcessor, ConductorConfig, TaskRequest};
//! use conductor_core::registry::handler_fn;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let processor = ConcurrentProcessor::new(ConductorConfig::default());
//! processor.register_handler("double", handler_fn(|task| async move {
//!     let n = task.payload.as_i64().unwrap_or(0);
//!     Ok(json!(n * 2))
//! }));
//!
//! let task_id = processor.submit(TaskRequest::new("double", json!(21))).unwrap();
//! let result = processor.wait_for(task_id).await.unwrap();
//! assert_eq!(result.output, Some(json!(42)));
//! processor.stop();
//! # });
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod scheduler;

pub use config::ConductorConfig;
pub use error::{ConductorError, Result};
pub use events::{ConductorEvent, EventPublisher};
pub use pipeline::{
    BatchOptions, PipelineBuilder, PipelineContext, PipelineMetrics, PipelineResult, Stage,
    StageConfig, StageHandler, WorkflowPipeline,
};
pub use registry::{TaskHandler, TaskHandlerRegistry};
pub use scheduler::{
    ConcurrentProcessor, ParallelExecutionManager, ParallelItemResult, ProcessorMetrics, Task,
    TaskId, TaskQueue, TaskRequest, TaskResult, WorkerId, WorkerInfo, WorkerPool, WorkerPoolStats,
};
