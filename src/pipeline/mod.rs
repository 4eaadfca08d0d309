//! # Pipeline Engine
//!
//! Multi-stage workflow execution with per-stage validation, transformation,
//! timeouts, retries, and error recovery.
//!
//! - [`stage`] - stage policy and the `StageHandler` hook trait
//! - [`context`] - per-run context, metrics, and terminal results
//! - [`engine`] - sequential, streaming, and batch execution

pub mod context;
pub mod engine;
pub mod stage;

pub use context::{
    PipelineContext, PipelineMetrics, PipelineResult, StageRunMetrics, StageStreamMetrics,
};
pub use engine::{BatchOptions, PipelineBuilder, WorkflowPipeline};
pub use stage::{FnStage, Stage, StageConfig, StageHandler};
