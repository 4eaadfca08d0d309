//! # Task Model
//!
//! Submission specs, stamped tasks, and completion results for the scheduling
//! core. Payloads are opaque JSON; dispatch happens on the `task_type` tag
//! through the [`crate::registry::TaskHandlerRegistry`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of a submitted task, unique for the orchestrator's lifetime
pub type TaskId = Uuid;

/// Identifier of a worker execution unit
pub type WorkerId = Uuid;

/// Priorities above this bound route to the priority queue; the rest are FIFO
pub const PRIORITY_QUEUE_THRESHOLD: i32 = 5;

/// Caller-supplied specification of a unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Dispatch tag resolved against the handler registry
    pub task_type: String,
    /// Opaque payload handed to the resolved handler
    pub payload: Value,
    /// Scheduling priority; values above [`PRIORITY_QUEUE_THRESHOLD`] jump the FIFO queue
    pub priority: i32,
    /// Per-task deadline, enforced inside the worker
    pub timeout: Option<Duration>,
    /// Retry attempts after the first failure
    pub max_retries: u32,
    /// Tasks that must appear in the completed map before this one is dequeued
    pub dependencies: Vec<TaskId>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, payload: Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority: 0,
            timeout: None,
            max_retries: 0,
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<TaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// A submitted task: the request plus identity and submission timestamp
///
/// Created on submission, consumed exactly once by dequeue, and referenced
/// afterwards only via its id in the completed-results map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub payload: Value,
    pub priority: i32,
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub dependencies: Vec<TaskId>,
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    /// Stamp a request with a fresh id and submission timestamp
    pub fn from_request(request: TaskRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: request.task_type,
            payload: request.payload,
            priority: request.priority,
            timeout: request.timeout,
            max_retries: request.max_retries,
            dependencies: request.dependencies,
            submitted_at: Utc::now(),
        }
    }

    /// Whether this task routes to the priority queue
    pub fn is_priority(&self) -> bool {
        self.priority > PRIORITY_QUEUE_THRESHOLD
    }
}

/// Immutable record of one task's completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub processing_time: Duration,
    /// Worker that executed the task; `None` for failures synthesized by the
    /// orchestrator (unknown task type, unresolvable dependency)
    pub worker_id: Option<WorkerId>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(
        task_id: TaskId,
        worker_id: WorkerId,
        output: Value,
        processing_time: Duration,
    ) -> Self {
        Self {
            task_id,
            success: true,
            output: Some(output),
            error: None,
            processing_time,
            worker_id: Some(worker_id),
            completed_at: Utc::now(),
        }
    }

    pub fn failure(
        task_id: TaskId,
        worker_id: Option<WorkerId>,
        error: impl Into<String>,
        processing_time: Duration,
    ) -> Self {
        Self {
            task_id,
            success: false,
            output: None,
            error: Some(error.into()),
            processing_time,
            worker_id,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}
