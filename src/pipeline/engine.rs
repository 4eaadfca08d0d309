//! # Workflow Pipeline Engine
//!
//! Ordered stage execution with per-stage validation, transformation,
//! timeouts, retries, and error recovery, in three modes:
//!
//! - [`WorkflowPipeline::execute`] - one input through all stages in
//!   registration order
//! - [`WorkflowPipeline::execute_stream`] - one adapter per stage chained
//!   into a single pull-based pipe; a slow downstream stage naturally
//!   throttles upstream reads
//! - [`WorkflowPipeline::execute_batch`] - many inputs under a concurrency
//!   ceiling, with optional fail-fast
//!
//! A stage marked `concurrent` is submitted as a task to the bound
//! [`ConcurrentProcessor`] instead of running inline, gaining worker isolation
//! and the pool's crash recovery; its result is awaited as if it were a plain
//! call.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{ConductorError, Result};
use crate::events::{ConductorEvent, EventPublisher};
use crate::pipeline::context::{
    PipelineContext, PipelineMetrics, PipelineResult, StageRunMetrics, StageStreamMetrics,
};
use crate::pipeline::stage::{Stage, StageHandler};
use crate::registry::TaskHandler;
use crate::scheduler::processor::ConcurrentProcessor;
use crate::scheduler::task::{Task, TaskRequest};

/// Options for batch execution
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub max_concurrency: usize,
    /// Stop dispatching new runs after the first failure; runs already
    /// started still finish
    pub fail_fast: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            fail_fast: false,
        }
    }
}

/// Builder for [`WorkflowPipeline`]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
    default_max_retries: u32,
    retry_delay: Duration,
    processor: Option<Arc<ConcurrentProcessor>>,
    events: Option<EventPublisher>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            default_max_retries: 3,
            retry_delay: Duration::from_millis(100),
            processor: None,
            events: None,
        }
    }

    /// Append a stage; execution order is registration order, always
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Pipeline-wide retry bound for stages that set none
    pub fn default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Fixed delay between retry attempts
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Bind a processor; stages marked `concurrent` are submitted to it
    pub fn processor(mut self, processor: Arc<ConcurrentProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Publish lifecycle events through an existing publisher
    pub fn events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<WorkflowPipeline> {
        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name().to_string()) {
                return Err(ConductorError::InvalidState(format!(
                    "duplicate stage name '{}'",
                    stage.name()
                )));
            }
        }

        let stream_metrics = self
            .stages
            .iter()
            .map(|_| Arc::new(Mutex::new(StageStreamMetrics::default())))
            .collect();

        Ok(WorkflowPipeline {
            stages: self.stages,
            default_max_retries: self.default_max_retries,
            retry_delay: self.retry_delay,
            processor: self.processor,
            events: self.events.unwrap_or_default(),
            stream_metrics,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered list of stages executed per input
pub struct WorkflowPipeline {
    stages: Vec<Stage>,
    default_max_retries: u32,
    retry_delay: Duration,
    processor: Option<Arc<ConcurrentProcessor>>,
    events: EventPublisher,
    stream_metrics: Vec<Arc<Mutex<StageStreamMetrics>>>,
}

impl WorkflowPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run one input through every stage in registration order
    pub async fn execute(&self, input: Value) -> PipelineResult {
        let run_started = Instant::now();
        let mut context = PipelineContext::new();
        let mut metrics = PipelineMetrics::default();
        let mut current = input;

        debug!(pipeline_id = %context.pipeline_id, stages = self.stages.len(), "Pipeline run started");

        for (index, stage) in self.stages.iter().enumerate() {
            context.stage_index = index;
            context.stage_name = stage.config.name.clone();

            let max_retries = stage
                .config
                .max_retries
                .unwrap_or(self.default_max_retries);
            let attempts = max_retries + 1;
            let stage_started = Instant::now();
            let mut stage_metrics = StageRunMetrics::new(stage.name());
            let mut output = None;
            let mut last_error =
                ConductorError::Processing("stage was never attempted".to_string());

            for attempt in 1..=attempts {
                context.retry_count = attempt - 1;
                stage_metrics.attempts = attempt;

                match self.run_stage_once(stage, current.clone(), &context).await {
                    Ok(value) => {
                        output = Some(value);
                        break;
                    }
                    Err(error) => {
                        warn!(
                            pipeline_id = %context.pipeline_id,
                            stage = %stage.name(),
                            attempt,
                            attempts,
                            error = %error,
                            "Stage attempt failed"
                        );
                        last_error = error;
                        if attempt < attempts {
                            self.events.publish(ConductorEvent::StageRetry {
                                pipeline_id: context.pipeline_id,
                                stage: stage.name().to_string(),
                                attempt,
                                error: last_error.to_string(),
                            });
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }

            stage_metrics.duration_ms = stage_started.elapsed().as_millis() as u64;

            match output {
                Some(value) => {
                    stage_metrics.succeeded = true;
                    metrics.stages.push(stage_metrics);
                    current = value;
                }
                None => {
                    // Retries exhausted: give the stage one shot at recovery.
                    if let Some(recovered) = stage.handler.on_error(&last_error, &current).await {
                        info!(
                            pipeline_id = %context.pipeline_id,
                            stage = %stage.name(),
                            "Stage recovered via on_error"
                        );
                        stage_metrics.succeeded = true;
                        stage_metrics.recovered = true;
                        metrics.stages.push(stage_metrics);
                        current = recovered;
                    } else {
                        metrics.stages.push(stage_metrics);
                        metrics.total_duration_ms = run_started.elapsed().as_millis() as u64;
                        self.events.publish(ConductorEvent::PipelineError {
                            pipeline_id: context.pipeline_id,
                            stage: stage.name().to_string(),
                            error: last_error.to_string(),
                        });
                        return PipelineResult::failed(last_error.to_string(), metrics, context);
                    }
                }
            }
        }

        metrics.total_duration_ms = run_started.elapsed().as_millis() as u64;
        self.events.publish(ConductorEvent::PipelineCompleted {
            pipeline_id: context.pipeline_id,
            total_duration_ms: metrics.total_duration_ms,
        });
        PipelineResult::completed(current, metrics, context)
    }

    /// Wire one adapter per stage into a single pull-based pipe
    ///
    /// Backpressure is the pipe's own demand propagation: a slow downstream
    /// stage throttles upstream reads. An item that fails a stage flows
    /// through the remaining adapters as an error without being processed.
    /// Stages run inline in this mode; `concurrent` is not delegated.
    pub fn execute_stream<S>(&self, input: S) -> BoxStream<'static, Result<Value>>
    where
        S: futures::Stream<Item = Value> + Send + 'static,
    {
        let base_context = PipelineContext::new();
        let mut stream: BoxStream<'static, Result<Value>> = input.map(Ok).boxed();

        for (index, stage) in self.stages.iter().enumerate() {
            let stage = stage.clone();
            let metrics = self.stream_metrics[index].clone();
            let mut stage_context = base_context.clone();
            stage_context.stage_index = index;
            stage_context.stage_name = stage.config.name.clone();

            stream = stream
                .then(move |item| {
                    let stage = stage.clone();
                    let metrics = metrics.clone();
                    let context = stage_context.clone();
                    async move {
                        let value = match item {
                            Ok(value) => value,
                            Err(error) => return Err(error),
                        };
                        let started = Instant::now();
                        let outcome = run_adapter(&stage, value, &context).await;

                        let mut counters = metrics.lock();
                        counters.total_duration_ms += started.elapsed().as_millis() as u64;
                        match &outcome {
                            Ok(_) => counters.processed += 1,
                            Err(_) => counters.errors += 1,
                        }
                        outcome
                    }
                })
                .boxed();
        }

        stream
    }

    /// Per-stage counters accumulated by streaming execution
    pub fn stream_metrics(&self) -> Vec<(String, StageStreamMetrics)> {
        self.stages
            .iter()
            .zip(&self.stream_metrics)
            .map(|(stage, metrics)| (stage.name().to_string(), metrics.lock().clone()))
            .collect()
    }

    /// Run `execute` per input under a concurrency ceiling
    ///
    /// Results arrive in completion order, not input order, whenever
    /// `max_concurrency` limits dispatch. With `fail_fast`, inputs not yet
    /// dispatched when a failure lands are skipped entirely and absent from
    /// the output.
    pub async fn execute_batch(
        &self,
        inputs: Vec<Value>,
        options: BatchOptions,
    ) -> Vec<PipelineResult> {
        let abort = AtomicBool::new(false);
        let abort = &abort;

        futures::stream::iter(inputs)
            .map(|input| async move {
                if options.fail_fast && abort.load(Ordering::Acquire) {
                    return None;
                }
                let result = self.execute(input).await;
                if !result.success {
                    abort.store(true, Ordering::Release);
                }
                Some(result)
            })
            .buffer_unordered(options.max_concurrency.max(1))
            .filter_map(|outcome| async move { outcome })
            .collect()
            .await
    }

    /// One stage attempt: validate, transform, then process under the deadline
    async fn run_stage_once(
        &self,
        stage: &Stage,
        input: Value,
        context: &PipelineContext,
    ) -> Result<Value> {
        stage.handler.validate(&input).await?;
        let transformed = stage.handler.transform(input).await?;

        if stage.config.concurrent {
            if let Some(processor) = &self.processor {
                return self
                    .run_stage_via_processor(stage, transformed, context, processor)
                    .await;
            }
        }

        process_with_timeout(stage, transformed, context).await
    }

    /// Submit the stage body as a task and await its result
    async fn run_stage_via_processor(
        &self,
        stage: &Stage,
        input: Value,
        context: &PipelineContext,
        processor: &Arc<ConcurrentProcessor>,
    ) -> Result<Value> {
        let task_type = stage_task_type(stage.name());
        if !processor.registry().contains(&task_type) {
            processor.register_handler(
                &task_type,
                Arc::new(StageTaskHandler {
                    handler: stage.handler.clone(),
                }),
            );
        }

        let envelope = StageTaskEnvelope {
            input,
            context: context.clone(),
        };
        let payload = serde_json::to_value(&envelope)
            .map_err(|e| ConductorError::Processing(format!("stage payload not serializable: {e}")))?;

        let mut request = TaskRequest::new(task_type, payload);
        if let Some(timeout) = stage.config.timeout {
            // The worker enforces the deadline; retries stay at this layer.
            request = request.with_timeout(timeout);
        }

        let task_id = processor.submit(request)?;
        let result = processor.wait_for(task_id).await?;
        if result.success {
            Ok(result.output.unwrap_or(Value::Null))
        } else {
            Err(ConductorError::Processing(
                result.error.unwrap_or_else(|| "task failed".to_string()),
            ))
        }
    }
}

/// Dispatch tag for a concurrent stage's tasks
fn stage_task_type(stage_name: &str) -> String {
    format!("pipeline.stage.{stage_name}")
}

/// Run `process` raced against the stage deadline, if one is set
async fn process_with_timeout(
    stage: &Stage,
    input: Value,
    context: &PipelineContext,
) -> Result<Value> {
    match stage.config.timeout {
        Some(limit) => match tokio::time::timeout(limit, stage.handler.process(input, context)).await
        {
            Ok(result) => result,
            Err(_) => Err(ConductorError::Timeout {
                timeout_ms: limit.as_millis() as u64,
            }),
        },
        None => stage.handler.process(input, context).await,
    }
}

/// Single-attempt stage adapter for streaming mode
async fn run_adapter(stage: &Stage, input: Value, context: &PipelineContext) -> Result<Value> {
    stage.handler.validate(&input).await?;
    let transformed = stage.handler.transform(input).await?;
    process_with_timeout(stage, transformed, context).await
}

/// Payload wrapper for stage bodies submitted as tasks
#[derive(Serialize, Deserialize)]
struct StageTaskEnvelope {
    input: Value,
    context: PipelineContext,
}

/// Adapts a [`StageHandler`] to the task handler interface
struct StageTaskHandler {
    handler: Arc<dyn StageHandler>,
}

#[async_trait]
impl TaskHandler for StageTaskHandler {
    async fn handle(&self, task: &Task) -> Result<Value> {
        let envelope: StageTaskEnvelope =
            serde_json::from_value(task.payload.clone()).map_err(|e| {
                ConductorError::Processing(format!("malformed stage envelope: {e}"))
            })?;
        self.handler.process(envelope.input, &envelope.context).await
    }
}
