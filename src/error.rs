//! # Error Taxonomy
//!
//! Structured errors for the scheduling core and the pipeline engine.
//!
//! Task and stage failures are retried locally up to their configured bound and
//! then surface as a failed `TaskResult`/`PipelineResult`; the orchestrator
//! itself never crashes on a body failure. `WorkerCrash` is absorbed by the
//! worker pool (the worker is replaced transparently) and only the in-flight
//! task on that worker is reported failed.

use uuid::Uuid;

/// Errors produced by the scheduling core and pipeline engine
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConductorError {
    /// Pre-execution validation rejected the input
    #[error("validation failed: {0}")]
    Validation(String),

    /// A task or stage body exceeded its deadline
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A task or stage body returned an error
    #[error("processing failed: {0}")]
    Processing(String),

    /// Submission rejected because the queue is at capacity
    #[error("queue full: capacity {capacity} reached")]
    QueueFull { capacity: usize },

    /// No handler registered for the task's dispatch tag
    #[error("no handler registered for task type '{0}'")]
    UnknownTaskType(String),

    /// A dependency was never submitted or has been dropped from the queue
    #[error("task {task_id} depends on {dependency}, which can never complete")]
    DependencyUnresolvable { task_id: Uuid, dependency: Uuid },

    /// A worker terminated abnormally while executing a task
    #[error("worker {worker_id} crashed: {reason}")]
    WorkerCrash { worker_id: Uuid, reason: String },

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation attempted in an invalid lifecycle state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl ConductorError {
    /// Whether this error was caused by a deadline expiring
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConductorError::Timeout { .. })
    }

    /// Whether this error was caused by failed validation
    pub fn is_validation(&self) -> bool {
        matches!(self, ConductorError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, ConductorError>;
