//! # Concurrent Processor
//!
//! The orchestrator: owns a [`TaskQueue`] and a [`WorkerPool`], drives a poll
//! loop, aggregates metrics, and exposes the submission API.
//!
//! Submission is synchronous (the task id is returned immediately); completion
//! delivery is asynchronous, either through [`ConcurrentProcessor::wait_for`]
//! or through the typed event stream. Queue and pool bookkeeping are mutated
//! only by the submit path and the poll loop under short critical sections.
//!
//! The poll loop is edge-driven: enqueues and worker completions wake it
//! immediately, with a fixed-interval tick as a fallback. When the queue is
//! empty and nothing is in flight the loop exits; the next submission restarts
//! it lazily.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

use crate::config::ConductorConfig;
use crate::error::{ConductorError, Result};
use crate::events::{ConductorEvent, EventPublisher};
use crate::registry::{TaskHandler, TaskHandlerRegistry};
use crate::scheduler::queue::TaskQueue;
use crate::scheduler::task::{Task, TaskId, TaskRequest, TaskResult};
use crate::scheduler::worker_pool::WorkerPool;

/// Point-in-time processor metrics
#[derive(Debug, Clone)]
pub struct ProcessorMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    /// Running average over every finished task's processing time
    pub average_processing_time_ms: f64,
    /// `busy_workers / total_workers`
    pub worker_utilization: f64,
    pub queue_depth: usize,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct MetricsState {
    completed: u64,
    failed: u64,
    average_processing_time_ms: f64,
}

impl MetricsState {
    fn record(&mut self, result: &TaskResult) {
        if result.success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        let finished = (self.completed + self.failed) as f64;
        let sample = result.processing_time.as_secs_f64() * 1000.0;
        self.average_processing_time_ms += (sample - self.average_processing_time_ms) / finished;
    }
}

struct ProcessorInner {
    queue: Mutex<TaskQueue>,
    pool: WorkerPool,
    registry: Arc<TaskHandlerRegistry>,
    events: EventPublisher,
    metrics: Mutex<MetricsState>,
    waiters: DashMap<TaskId, oneshot::Sender<TaskResult>>,
    results_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskResult>>,
    submit_wake: Notify,
    running: AtomicBool,
    shutdown: AtomicBool,
    in_flight: AtomicUsize,
    poll_interval: Duration,
    queue_capacity: usize,
}

/// Orchestrator over a task queue and a self-healing worker pool
///
/// An explicit instance with an owned lifecycle; clone handles freely and call
/// [`ConcurrentProcessor::stop`] when done. Requires a tokio runtime.
#[derive(Clone)]
pub struct ConcurrentProcessor {
    inner: Arc<ProcessorInner>,
}

impl ConcurrentProcessor {
    pub fn new(config: ConductorConfig) -> Self {
        let pool = WorkerPool::new(config.max_workers);
        let results_rx = pool
            .take_results()
            .expect("results receiver is available on a freshly constructed pool");

        let inner = Arc::new(ProcessorInner {
            queue: Mutex::new(TaskQueue::new(config.queue_capacity)),
            pool,
            registry: Arc::new(TaskHandlerRegistry::new()),
            events: EventPublisher::new(config.event_channel_capacity),
            metrics: Mutex::new(MetricsState::default()),
            waiters: DashMap::new(),
            results_rx: tokio::sync::Mutex::new(results_rx),
            submit_wake: Notify::new(),
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            queue_capacity: config.queue_capacity,
        });

        Self { inner }
    }

    /// Register a handler for a task type
    pub fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.inner.registry.register(task_type, handler);
    }

    pub fn registry(&self) -> Arc<TaskHandlerRegistry> {
        self.inner.registry.clone()
    }

    /// Submit one task: stamp id + timestamp, enqueue, wake the poll loop
    ///
    /// Returns the id immediately; the result arrives later via
    /// [`ConcurrentProcessor::wait_for`] or the event stream.
    pub fn submit(&self, request: TaskRequest) -> Result<TaskId> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(ConductorError::InvalidState(
                "processor is stopped".to_string(),
            ));
        }

        let task = Task::from_request(request);
        let task_id = task.id;
        let accepted = self.inner.queue.lock().enqueue(task);
        if !accepted {
            return Err(ConductorError::QueueFull {
                capacity: self.inner.queue_capacity,
            });
        }

        debug!(task_id = %task_id, "Task submitted");
        ProcessorInner::ensure_polling(&self.inner);
        self.inner.submit_wake.notify_one();
        Ok(task_id)
    }

    /// Submit a batch sequentially; one rejection does not abort the rest
    pub fn submit_batch(&self, requests: Vec<TaskRequest>) -> Vec<Result<TaskId>> {
        requests
            .into_iter()
            .map(|request| self.submit(request))
            .collect()
    }

    /// Await one task's completion
    ///
    /// Resolves immediately if the task already finished.
    pub async fn wait_for(&self, task_id: TaskId) -> Result<TaskResult> {
        if let Some(result) = self.inner.queue.lock().completed(&task_id).cloned() {
            return Ok(result);
        }

        let (tx, rx) = oneshot::channel();
        self.inner.waiters.insert(task_id, tx);

        // Close the race with a completion that landed between the check and
        // the waiter registration.
        if let Some(result) = self.inner.queue.lock().completed(&task_id).cloned() {
            self.inner.waiters.remove(&task_id);
            return Ok(result);
        }

        rx.await.map_err(|_| {
            ConductorError::InvalidState("processor stopped before task completed".to_string())
        })
    }

    pub fn metrics(&self) -> ProcessorMetrics {
        let metrics = self.inner.metrics.lock();
        let pool_stats = self.inner.pool.stats();
        let utilization = if pool_stats.total_workers == 0 {
            0.0
        } else {
            pool_stats.busy_workers as f64 / pool_stats.total_workers as f64
        };

        ProcessorMetrics {
            tasks_completed: metrics.completed,
            tasks_failed: metrics.failed,
            average_processing_time_ms: metrics.average_processing_time_ms,
            worker_utilization: utilization,
            queue_depth: self.inner.queue.lock().len(),
            in_flight: self.inner.in_flight.load(Ordering::Acquire),
        }
    }

    /// Snapshot of the worker pool's aggregate statistics
    pub fn worker_stats(&self) -> crate::scheduler::worker_pool::WorkerPoolStats {
        self.inner.pool.stats()
    }

    /// Subscribe to task and pipeline lifecycle events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ConductorEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> EventPublisher {
        self.inner.events.clone()
    }

    /// Drop all not-yet-dequeued tasks, returning how many were dropped
    ///
    /// Tasks already assigned to a worker cannot be cancelled and run to
    /// completion. Dependents of dropped tasks fail on the next scan.
    pub fn clear_queue(&self) -> usize {
        let dropped = self.inner.queue.lock().clear();
        info!(dropped, "Queue cleared");
        dropped
    }

    /// Stop the poll loop and shut the worker pool down
    ///
    /// In-flight results are no longer delivered; pending `wait_for` callers
    /// receive an error.
    pub fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.submit_wake.notify_one();
        self.inner.pool.shutdown();
        self.inner.waiters.clear();
        info!("Processor stopped");
    }
}

impl ProcessorInner {
    /// Start the poll loop if it is not already running
    fn ensure_polling(inner: &Arc<ProcessorInner>) {
        if inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let inner = inner.clone();
            tokio::spawn(async move {
                ProcessorInner::poll_loop(&inner).await;
            });
        }
    }

    async fn poll_loop(inner: &Arc<ProcessorInner>) {
        debug!("Poll loop started");
        let mut results_rx = inner.results_rx.lock().await;
        let mut interval = tokio::time::interval(inner.poll_interval);

        loop {
            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }

            // Drain any completions that arrived since the last wake.
            while let Ok(result) = results_rx.try_recv() {
                inner.handle_completion(result);
            }

            // Fail tasks whose dependencies can never complete.
            let unresolvable = inner.queue.lock().take_unresolvable();
            for (task, dependency) in unresolvable {
                let error = ConductorError::DependencyUnresolvable {
                    task_id: task.id,
                    dependency,
                };
                warn!(task_id = %task.id, dependency = %dependency, "Dependency can never complete");
                inner.complete_locally(&task, &error);
            }

            inner.assign_ready_tasks();

            // Park when idle: the next submission restarts the loop.
            let queue_empty = inner.queue.lock().is_empty();
            if queue_empty && inner.in_flight.load(Ordering::Acquire) == 0 {
                break;
            }

            tokio::select! {
                maybe_result = results_rx.recv() => {
                    match maybe_result {
                        Some(result) => inner.handle_completion(result),
                        None => break,
                    }
                }
                _ = inner.submit_wake.notified() => {}
                _ = interval.tick() => {}
            }
        }

        drop(results_rx);
        inner.running.store(false, Ordering::Release);
        debug!("Poll loop parked");

        // A submission that raced the shutdown of this loop restarts it.
        if !inner.shutdown.load(Ordering::Acquire) && !inner.queue.lock().is_empty() {
            ProcessorInner::ensure_polling(inner);
        }
    }

    /// Hand every ready task to an available worker
    fn assign_ready_tasks(&self) {
        loop {
            let Some(worker_id) = self.pool.checkout() else {
                break;
            };

            let dequeued = self.queue.lock().dequeue();
            let Some(task) = dequeued else {
                self.pool.return_worker(worker_id);
                break;
            };

            match self.registry.resolve(&task.task_type) {
                Some(handler) => match self.pool.assign(worker_id, task.clone(), handler) {
                    Ok(()) => {
                        self.in_flight.fetch_add(1, Ordering::AcqRel);
                    }
                    Err(err) => {
                        warn!(task_id = %task.id, error = %err, "Assignment failed, re-enqueueing");
                        if !self.queue.lock().enqueue(task.clone()) {
                            self.complete_locally(
                                &task,
                                &ConductorError::QueueFull {
                                    capacity: self.queue_capacity,
                                },
                            );
                        }
                    }
                },
                None => {
                    self.pool.return_worker(worker_id);
                    let error = ConductorError::UnknownTaskType(task.task_type.clone());
                    warn!(task_id = %task.id, task_type = %task.task_type, "No handler for task type");
                    self.complete_locally(&task, &error);
                }
            }
        }
    }

    /// Process a completion from the worker pool
    fn handle_completion(&self, result: TaskResult) {
        self.pool.release(&result);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.finish(result);
    }

    /// Fail a task that never reached a worker
    fn complete_locally(&self, task: &Task, error: &ConductorError) {
        let result = TaskResult::failure(task.id, None, error.to_string(), Duration::ZERO);
        self.finish(result);
    }

    /// Record the result, notify the waiter, publish the event
    fn finish(&self, result: TaskResult) {
        self.metrics.lock().record(&result);
        self.queue
            .lock()
            .mark_completed(result.task_id, result.clone());

        if let Some((_, waiter)) = self.waiters.remove(&result.task_id) {
            let _ = waiter.send(result.clone());
        }

        let event = if result.success {
            ConductorEvent::TaskCompleted {
                task_id: result.task_id,
                result,
            }
        } else {
            ConductorEvent::TaskFailed {
                task_id: result.task_id,
                result,
            }
        };
        self.events.publish(event);
    }
}
