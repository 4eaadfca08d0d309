use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::scheduler::task::{TaskId, TaskResult};

/// Lifecycle events emitted by the processor and pipeline engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConductorEvent {
    /// A task finished successfully
    TaskCompleted { task_id: TaskId, result: TaskResult },
    /// A task exhausted its retries or could never run
    TaskFailed { task_id: TaskId, result: TaskResult },
    /// A stage attempt failed and will be retried
    StageRetry {
        pipeline_id: Uuid,
        stage: String,
        attempt: u32,
        error: String,
    },
    /// A pipeline run finished with all stages succeeding
    PipelineCompleted {
        pipeline_id: Uuid,
        total_duration_ms: u64,
    },
    /// A pipeline run aborted at a stage
    PipelineError {
        pipeline_id: Uuid,
        stage: String,
        error: String,
    },
}

/// High-throughput publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<ConductorEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    ///
    /// Publishing with zero subscribers is not an error; events are dropped.
    pub fn publish(&self, event: ConductorEvent) {
        trace!(?event, "Publishing event");
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ConductorEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}
