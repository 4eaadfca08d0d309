//! # Worker Pool
//!
//! Fixed-size pool of isolated execution units with crash self-healing.
//!
//! Exactly `max_workers` worker tasks are spawned eagerly at construction.
//! Each worker owns an mpsc request channel, enforces the per-task timeout
//! itself (racing the handler future against a timer), retries the handler up
//! to the task's retry bound, and reports a [`TaskResult`] on a shared results
//! channel. A worker that terminates abnormally is detected by its supervisor,
//! its in-flight task is reported failed, and a transparent replacement is
//! spawned so the pool size is always `max_workers` — callers never observe
//! the crash directly.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ConductorError, Result};
use crate::registry::TaskHandler;
use crate::scheduler::task::{Task, TaskId, TaskResult, WorkerId};

/// Bookkeeping for one worker, owned exclusively by the pool
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub busy: bool,
    pub current_task: Option<TaskId>,
    pub tasks_completed: u64,
    pub total_processing_time: Duration,
    pub last_activity: Instant,
    pub error_count: u32,
}

impl WorkerInfo {
    fn new(id: WorkerId) -> Self {
        Self {
            id,
            busy: false,
            current_task: None,
            tasks_completed: 0,
            total_processing_time: Duration::ZERO,
            last_activity: Instant::now(),
            error_count: 0,
        }
    }
}

/// Aggregate pool statistics
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub available_workers: usize,
    pub total_tasks_completed: u64,
    pub crashes_healed: u64,
}

struct WorkerRequest {
    task: Task,
    handler: Arc<dyn TaskHandler>,
}

struct WorkerSlot {
    info: WorkerInfo,
    tx: mpsc::UnboundedSender<WorkerRequest>,
}

struct PoolInner {
    max_workers: usize,
    workers: Mutex<HashMap<WorkerId, WorkerSlot>>,
    available: Mutex<VecDeque<WorkerId>>,
    results_tx: mpsc::UnboundedSender<TaskResult>,
    crashes_healed: AtomicU64,
    shutting_down: AtomicBool,
}

/// Fixed-size, self-healing pool of worker execution units
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    results_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskResult>>>,
}

impl WorkerPool {
    /// Eagerly spawn exactly `max_workers` workers
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(max_workers: usize) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PoolInner {
            max_workers,
            workers: Mutex::new(HashMap::new()),
            available: Mutex::new(VecDeque::new()),
            results_tx,
            crashes_healed: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        });

        for _ in 0..max_workers {
            let id = PoolInner::spawn_worker(&inner);
            inner.available.lock().push_back(id);
        }
        info!(max_workers, "Worker pool started");

        Self {
            inner,
            results_rx: Mutex::new(Some(results_rx)),
        }
    }

    /// Take the completion channel; yields results from every worker,
    /// including failures synthesized for crashed workers
    ///
    /// Can only be taken once.
    pub fn take_results(&self) -> Option<mpsc::UnboundedReceiver<TaskResult>> {
        self.results_rx.lock().take()
    }

    /// Pop the front of the available list, or `None` if all workers are busy
    pub fn checkout(&self) -> Option<WorkerId> {
        self.inner.available.lock().pop_front()
    }

    /// Return a checked-out worker that was never assigned a task
    pub fn return_worker(&self, worker_id: WorkerId) {
        self.inner.available.lock().push_front(worker_id);
    }

    /// Dispatch a task to a checked-out worker
    ///
    /// Marks the worker busy and stamps its activity time; the worker enforces
    /// the task's timeout itself. Fails if the worker no longer exists (it
    /// crashed between checkout and assignment).
    pub fn assign(
        &self,
        worker_id: WorkerId,
        task: Task,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        let mut workers = self.inner.workers.lock();
        let slot = workers
            .get_mut(&worker_id)
            .ok_or_else(|| ConductorError::WorkerCrash {
                worker_id,
                reason: "worker no longer exists".to_string(),
            })?;

        slot.info.busy = true;
        slot.info.current_task = Some(task.id);
        slot.info.last_activity = Instant::now();

        debug!(worker_id = %worker_id, task_id = %task.id, task_type = %task.task_type, "Task assigned");
        slot.tx
            .send(WorkerRequest { task, handler })
            .map_err(|_| ConductorError::WorkerCrash {
                worker_id,
                reason: "worker channel closed".to_string(),
            })
    }

    /// Free the worker that produced `result` and accumulate its stats
    ///
    /// Tolerates results from workers that have since been replaced.
    pub fn release(&self, result: &TaskResult) {
        let Some(worker_id) = result.worker_id else {
            return;
        };
        let mut workers = self.inner.workers.lock();
        let Some(slot) = workers.get_mut(&worker_id) else {
            debug!(worker_id = %worker_id, "Completion from a replaced worker, nothing to release");
            return;
        };

        slot.info.busy = false;
        slot.info.current_task = None;
        slot.info.tasks_completed += 1;
        slot.info.total_processing_time += result.processing_time;
        slot.info.last_activity = Instant::now();
        if !result.success {
            slot.info.error_count += 1;
        }
        drop(workers);

        self.inner.available.lock().push_back(worker_id);
    }

    /// Snapshot of every worker's bookkeeping
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.inner
            .workers
            .lock()
            .values()
            .map(|slot| slot.info.clone())
            .collect()
    }

    pub fn stats(&self) -> WorkerPoolStats {
        let workers = self.inner.workers.lock();
        let total_workers = workers.len();
        let busy_workers = workers.values().filter(|slot| slot.info.busy).count();
        let total_tasks_completed = workers.values().map(|slot| slot.info.tasks_completed).sum();
        drop(workers);

        WorkerPoolStats {
            total_workers,
            busy_workers,
            available_workers: total_workers - busy_workers,
            total_tasks_completed,
            crashes_healed: self.inner.crashes_healed.load(Ordering::Relaxed),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Stop all workers; no replacements are spawned after shutdown
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        self.inner.workers.lock().clear();
        self.inner.available.lock().clear();
        info!("Worker pool shut down");
    }
}

impl PoolInner {
    /// Spawn one worker and its supervisor; returns the worker id
    fn spawn_worker(inner: &Arc<PoolInner>) -> WorkerId {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let results_tx = inner.results_tx.clone();

        let handle = tokio::spawn(worker_loop(id, rx, results_tx));
        inner
            .workers
            .lock()
            .insert(id, WorkerSlot { info: WorkerInfo::new(id), tx });

        // Supervisor: a panicking handler kills the worker task; replace it
        // transparently and report the in-flight task as failed.
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            match handle.await {
                Ok(()) => {
                    debug!(worker_id = %id, "Worker exited cleanly");
                }
                Err(join_error) if join_error.is_panic() => {
                    if let Some(inner) = weak.upgrade() {
                        PoolInner::heal_crashed_worker(&inner, id);
                    }
                }
                Err(_) => {
                    // Cancelled during shutdown
                }
            }
        });

        id
    }

    fn heal_crashed_worker(inner: &Arc<PoolInner>, crashed_id: WorkerId) {
        if inner.shutting_down.load(Ordering::Acquire) {
            return;
        }

        let removed = inner.workers.lock().remove(&crashed_id);
        let Some(mut slot) = removed else {
            return;
        };
        slot.info.error_count += 1;
        inner.crashes_healed.fetch_add(1, Ordering::Relaxed);
        error!(
            worker_id = %crashed_id,
            error_count = slot.info.error_count,
            in_flight = ?slot.info.current_task,
            "Worker crashed, spawning replacement"
        );

        if let Some(task_id) = slot.info.current_task {
            let crash = ConductorError::WorkerCrash {
                worker_id: crashed_id,
                reason: "panicked while executing task".to_string(),
            };
            let result = TaskResult::failure(
                task_id,
                Some(crashed_id),
                crash.to_string(),
                slot.info.last_activity.elapsed(),
            );
            let _ = inner.results_tx.send(result);
        }

        // The crashed worker was busy, so it is not in the available list,
        // but a checkout/crash race can leave it there.
        inner.available.lock().retain(|id| *id != crashed_id);

        let replacement = Self::spawn_worker(inner);
        inner.available.lock().push_back(replacement);
    }
}

/// Body of one worker execution unit
///
/// Timeout enforcement and per-task retries happen here, not in the pool: the
/// handler future is raced against the task's deadline on every attempt.
async fn worker_loop(
    worker_id: WorkerId,
    mut rx: mpsc::UnboundedReceiver<WorkerRequest>,
    results_tx: mpsc::UnboundedSender<TaskResult>,
) {
    while let Some(WorkerRequest { task, handler }) = rx.recv().await {
        let started = Instant::now();
        let attempts = task.max_retries + 1;
        let mut output = None;
        let mut last_error = ConductorError::Processing("task was never attempted".to_string());

        for attempt in 1..=attempts {
            let outcome = match task.timeout {
                Some(limit) => match tokio::time::timeout(limit, handler.handle(&task)).await {
                    Ok(result) => result,
                    Err(_) => Err(ConductorError::Timeout {
                        timeout_ms: limit.as_millis() as u64,
                    }),
                },
                None => handler.handle(&task).await,
            };

            match outcome {
                Ok(value) => {
                    output = Some(value);
                    break;
                }
                Err(err) => {
                    warn!(
                        worker_id = %worker_id,
                        task_id = %task.id,
                        attempt,
                        attempts,
                        error = %err,
                        "Task attempt failed"
                    );
                    last_error = err;
                }
            }
        }

        let processing_time = started.elapsed();
        let result = match output {
            Some(value) => TaskResult::success(task.id, worker_id, value, processing_time),
            None => TaskResult::failure(
                task.id,
                Some(worker_id),
                last_error.to_string(),
                processing_time,
            ),
        };

        if results_tx.send(result).is_err() {
            // Orchestrator is gone; nothing left to report to.
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::handler_fn;
    use crate::scheduler::task::TaskRequest;
    use serde_json::{json, Value};

    fn stamped(request: TaskRequest) -> Task {
        Task::from_request(request)
    }

    #[tokio::test]
    async fn test_eager_spawn_and_checkout() {
        let pool = WorkerPool::new(3);
        assert_eq!(pool.stats().total_workers, 3);
        assert_eq!(pool.stats().available_workers, 3);

        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        let c = pool.checkout().unwrap();
        assert!(pool.checkout().is_none());
        assert_ne!(a, b);
        assert_ne!(b, c);

        pool.return_worker(a);
        assert_eq!(pool.checkout(), Some(a));
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_assign_and_complete() {
        let pool = WorkerPool::new(1);
        let mut results = pool.take_results().unwrap();
        let handler = handler_fn(|task| async move { Ok(task.payload) });

        let worker = pool.checkout().unwrap();
        let task = stamped(TaskRequest::new("echo", json!("hello")));
        let task_id = task.id;
        pool.assign(worker, task, handler).unwrap();

        let result = results.recv().await.unwrap();
        assert_eq!(result.task_id, task_id);
        assert!(result.success);
        assert_eq!(result.output, Some(json!("hello")));
        assert_eq!(result.worker_id, Some(worker));

        pool.release(&result);
        let stats = pool.stats();
        assert_eq!(stats.total_tasks_completed, 1);
        assert_eq!(stats.available_workers, 1);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_worker_enforces_timeout() {
        let pool = WorkerPool::new(1);
        let mut results = pool.take_results().unwrap();
        let handler = handler_fn(|_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Value::Null)
        });

        let worker = pool.checkout().unwrap();
        let task = stamped(
            TaskRequest::new("slow", Value::Null).with_timeout(Duration::from_millis(20)),
        );
        pool.assign(worker, task, handler).unwrap();

        let result = results.recv().await.unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_worker_retries_before_failing() {
        let invocations = Arc::new(AtomicU64::new(0));
        let counter = invocations.clone();
        let handler = handler_fn(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ConductorError::Processing("always fails".to_string()))
            }
        });

        let pool = WorkerPool::new(1);
        let mut results = pool.take_results().unwrap();
        let worker = pool.checkout().unwrap();
        let task = stamped(TaskRequest::new("flaky", Value::Null).with_max_retries(2));
        pool.assign(worker, task, handler).unwrap();

        let result = results.recv().await.unwrap();
        assert!(!result.success);
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        pool.shutdown();
    }

    async fn exploding(_task: Task) -> crate::error::Result<Value> {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn test_crash_self_healing() {
        let pool = WorkerPool::new(2);
        let mut results = pool.take_results().unwrap();
        let panicking = handler_fn(exploding);

        let worker = pool.checkout().unwrap();
        let task = stamped(TaskRequest::new("bomb", Value::Null));
        let task_id = task.id;
        pool.assign(worker, task, panicking).unwrap();

        // The supervisor reports the in-flight task failed...
        let result = results.recv().await.unwrap();
        assert_eq!(result.task_id, task_id);
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("crashed"));
        pool.release(&result);

        // ...and the pool heals back to full size and keeps serving.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = pool.stats();
        assert_eq!(stats.total_workers, 2);
        assert_eq!(stats.crashes_healed, 1);

        let echo = handler_fn(|task| async move { Ok(task.payload) });
        let worker = pool.checkout().unwrap();
        let task = stamped(TaskRequest::new("echo", json!(7)));
        pool.assign(worker, task, echo).unwrap();
        let result = results.recv().await.unwrap();
        assert!(result.success);
        pool.shutdown();
    }
}
