//! Per-run pipeline state and terminal artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Mutable state threaded through one pipeline run
///
/// Created per run, advanced as stages execute, discarded (snapshotted into
/// the [`PipelineResult`]) when the run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    pub pipeline_id: Uuid,
    pub stage_index: usize,
    pub stage_name: String,
    pub metadata: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
    /// Retries consumed by the current stage attempt
    pub retry_count: u32,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self {
            pipeline_id: Uuid::new_v4(),
            stage_index: 0,
            stage_name: String::new(),
            metadata: HashMap::new(),
            started_at: Utc::now(),
            retry_count: 0,
        }
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution record for one stage within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRunMetrics {
    pub name: String,
    /// Invocations of `process` (or `validate` failures), including the first
    pub attempts: u32,
    pub duration_ms: u64,
    pub succeeded: bool,
    /// Whether `on_error` supplied the stage output after retries exhausted
    pub recovered: bool,
}

impl StageRunMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attempts: 0,
            duration_ms: 0,
            succeeded: false,
            recovered: false,
        }
    }
}

/// Metrics for a whole pipeline run; partial when the run aborted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub stages: Vec<StageRunMetrics>,
    pub total_duration_ms: u64,
}

/// Terminal artifact of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub metrics: PipelineMetrics,
    pub context: PipelineContext,
}

impl PipelineResult {
    pub fn completed(output: Value, metrics: PipelineMetrics, context: PipelineContext) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            metrics,
            context,
        }
    }

    pub fn failed(
        error: impl Into<String>,
        metrics: PipelineMetrics,
        context: PipelineContext,
    ) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            metrics,
            context,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// Per-stage counters for streaming execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageStreamMetrics {
    pub processed: u64,
    pub errors: u64,
    pub total_duration_ms: u64,
}
