//! # Parallel Execution Manager
//!
//! Bounded-concurrency batch runner independent of the task queue: no
//! priorities, no dependencies, no worker bookkeeping. A lighter-weight
//! sibling of the processor for fire-and-forget fan-out work.

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Outcome of one closure in a parallel batch
#[derive(Debug, Clone)]
pub struct ParallelItemResult {
    /// Position of the closure in the submitted list
    pub index: usize,
    pub success: bool,
    pub value: Option<Value>,
    pub error: Option<String>,
}

impl ParallelItemResult {
    fn from_outcome(index: usize, outcome: Result<Value>) -> Self {
        match outcome {
            Ok(value) => Self {
                index,
                success: true,
                value: Some(value),
                error: None,
            },
            Err(err) => Self {
                index,
                success: false,
                value: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Runs batches of async closures to completion concurrently
#[derive(Debug, Clone, Default)]
pub struct ParallelExecutionManager;

impl ParallelExecutionManager {
    pub fn new() -> Self {
        Self
    }

    /// Split `fns` into fixed-size batches and run each batch concurrently
    ///
    /// Every closure yields a per-item result; one failure (or panic) never
    /// aborts the rest of its batch. Results are returned in submission order,
    /// but execution order across a batch is unspecified.
    pub async fn execute_parallel(
        &self,
        fns: Vec<BoxFuture<'static, Result<Value>>>,
        batch_size: usize,
    ) -> Vec<ParallelItemResult> {
        let batch_size = batch_size.max(1);
        let total = fns.len();
        let mut results = Vec::with_capacity(total);
        let mut iter = fns.into_iter().enumerate();

        loop {
            let batch: Vec<_> = iter.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }

            // Spawned so a panicking closure is isolated to its own item.
            let handles: Vec<_> = batch
                .into_iter()
                .map(|(index, fut)| (index, tokio::spawn(fut)))
                .collect();

            for (index, handle) in handles {
                let outcome = match handle.await {
                    Ok(result) => result,
                    Err(join_error) => Err(crate::error::ConductorError::Processing(format!(
                        "parallel task panicked: {join_error}"
                    ))),
                };
                results.push(ParallelItemResult::from_outcome(index, outcome));
            }
        }

        debug!(
            total,
            failed = results.iter().filter(|r| !r.success).count(),
            "Parallel batch execution finished"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConductorError;
    use futures::FutureExt;
    use serde_json::json;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_results_in_submission_order() {
        let manager = ParallelExecutionManager::new();
        let fns: Vec<BoxFuture<'static, Result<Value>>> = (0..7)
            .map(|i| async move { Ok(json!(i)) }.boxed())
            .collect();

        let results = manager.execute_parallel(fns, 3).await;
        assert_eq!(results.len(), 7);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.index, i);
            assert!(result.success);
            assert_eq!(result.value, Some(json!(i)));
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let manager = ParallelExecutionManager::new();
        let fns: Vec<BoxFuture<'static, Result<Value>>> = vec![
            async { Ok(json!("ok")) }.boxed(),
            async { Err(ConductorError::Processing("bad item".to_string())) }.boxed(),
            async { Ok(json!("also ok")) }.boxed(),
        ];

        let results = manager.execute_parallel(fns, 10).await;
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[1].error.as_deref().unwrap().contains("bad item"));
        assert!(results[2].success);
    }

    #[tokio::test]
    async fn test_batching_limits_concurrency() {
        let manager = ParallelExecutionManager::new();
        // 4 closures sleeping 50ms in batches of 2 cannot finish in one wave.
        let fns: Vec<BoxFuture<'static, Result<Value>>> = (0..4)
            .map(|_| {
                async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Value::Null)
                }
                .boxed()
            })
            .collect();

        let started = Instant::now();
        let results = manager.execute_parallel(fns, 2).await;
        assert!(results.iter().all(|r| r.success));
        assert!(started.elapsed() >= Duration::from_millis(90));
    }
}
