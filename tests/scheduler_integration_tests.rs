//! End-to-end tests for the scheduling core: submission through completion
//! across the queue, the worker pool, and the processor's poll loop.

use conductor_core::registry::handler_fn;
use conductor_core::{
    ConcurrentProcessor, ConductorConfig, ConductorError, ConductorEvent, TaskRequest,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn processor_with(max_workers: usize, queue_capacity: usize) -> ConcurrentProcessor {
    let config = ConductorConfig {
        max_workers,
        queue_capacity,
        poll_interval_ms: 10,
        ..ConductorConfig::default()
    };
    ConcurrentProcessor::new(config)
}

#[tokio::test]
async fn ten_tasks_on_four_workers_all_succeed() {
    let processor = processor_with(4, 100);
    processor.register_handler(
        "sleepy",
        handler_fn(|task| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(task.payload)
        }),
    );

    let started = Instant::now();
    let ids: Vec<_> = (0..10)
        .map(|i| {
            processor
                .submit(TaskRequest::new("sleepy", json!(i)).with_priority(5))
                .unwrap()
        })
        .collect();

    for id in ids {
        let result = processor.wait_for(id).await.unwrap();
        assert!(result.success);
        assert!(result.worker_id.is_some());
    }

    // Three waves of 50ms each at minimum; generous ceiling for scheduling
    // overhead under load.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(140), "too fast: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "too slow: {elapsed:?}");
    processor.stop();
}

#[tokio::test]
async fn priority_tasks_run_before_fifo_tasks() {
    let processor = processor_with(1, 100);
    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let recorder = order.clone();
    processor.register_handler(
        "record",
        handler_fn(move |task| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().push(task.payload.as_str().unwrap_or("").to_string());
                Ok(Value::Null)
            }
        }),
    );
    processor.register_handler(
        "gate",
        handler_fn(|_| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Value::Null)
        }),
    );

    // The gate outranks everything and occupies the single worker while the
    // rest are enqueued, so their dequeue order is decided purely by the queue.
    processor
        .submit(TaskRequest::new("gate", Value::Null).with_priority(10))
        .unwrap();
    let labels = [("first-9", 9), ("only-1", 1), ("only-5", 5), ("second-9", 9)];
    let mut ids = Vec::new();
    for (label, priority) in labels {
        ids.push(
            processor
                .submit(TaskRequest::new("record", json!(label)).with_priority(priority))
                .unwrap(),
        );
    }
    for id in ids {
        processor.wait_for(id).await.unwrap();
    }

    let recorded = order.lock().clone();
    assert_eq!(recorded.len(), 4);
    // Both priority-9 tasks precede the priority-5 task, and keep their
    // submission order relative to each other.
    let pos = |label: &str| recorded.iter().position(|l| l == label).unwrap();
    assert!(pos("first-9") < pos("second-9"));
    assert!(pos("second-9") < pos("only-5"));
    assert!(pos("first-9") < pos("only-1"));
    processor.stop();
}

#[tokio::test]
async fn pool_heals_after_crash_and_keeps_serving() {
    let processor = processor_with(2, 100);
    processor.register_handler("explode", handler_fn(exploding_handler));
    processor.register_handler("echo", handler_fn(|task| async move { Ok(task.payload) }));

    let doomed = processor
        .submit(TaskRequest::new("explode", Value::Null))
        .unwrap();
    let result = processor.wait_for(doomed).await.unwrap();
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("crashed"));

    // Replacement happens transparently; the pool is back at full size.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = processor.worker_stats();
    assert_eq!(stats.total_workers, 2);
    assert_eq!(stats.crashes_healed, 1);

    for i in 0..4 {
        let id = processor
            .submit(TaskRequest::new("echo", json!(i)))
            .unwrap();
        let result = processor.wait_for(id).await.unwrap();
        assert!(result.success);
    }
    processor.stop();
}

async fn exploding_handler(_task: conductor_core::Task) -> conductor_core::Result<Value> {
    panic!("handler exploded")
}

#[tokio::test]
async fn dependency_chain_executes_in_order() {
    let processor = processor_with(4, 100);
    let order: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

    let recorder = order.clone();
    processor.register_handler(
        "record",
        handler_fn(move |task| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().push(task.payload.as_i64().unwrap_or(-1));
                Ok(task.payload)
            }
        }),
    );

    let a = processor.submit(TaskRequest::new("record", json!(1))).unwrap();
    let b = processor
        .submit(TaskRequest::new("record", json!(2)).with_dependencies(vec![a]))
        .unwrap();
    let c = processor
        .submit(TaskRequest::new("record", json!(3)).with_dependencies(vec![a, b]))
        .unwrap();

    processor.wait_for(c).await.unwrap();
    assert_eq!(order.lock().clone(), vec![1, 2, 3]);
    processor.stop();
}

#[tokio::test]
async fn batch_submission_reports_rejections_individually() {
    let processor = processor_with(1, 2);
    processor.register_handler("echo", handler_fn(|task| async move { Ok(task.payload) }));

    // Gate every task on an id that is never submitted so the queue stays
    // full for the whole batch; the dependents are failed later by policy.
    let phantom = uuid::Uuid::new_v4();
    let requests: Vec<_> = (0..4)
        .map(|i| TaskRequest::new("echo", json!(i)).with_dependencies(vec![phantom]))
        .collect();

    let outcomes = processor.submit_batch(requests);
    assert!(outcomes[0].is_ok());
    assert!(outcomes[1].is_ok());
    assert!(matches!(
        outcomes[2],
        Err(ConductorError::QueueFull { capacity: 2 })
    ));
    assert!(matches!(outcomes[3], Err(ConductorError::QueueFull { .. })));

    // Accepted-but-unresolvable tasks fail instead of starving.
    let failed = processor
        .wait_for(*outcomes[0].as_ref().unwrap())
        .await
        .unwrap();
    assert!(!failed.success);
    assert!(failed.error.as_deref().unwrap().contains("never complete"));
    processor.stop();
}

#[tokio::test]
async fn completion_events_cover_every_successful_task() {
    let processor = processor_with(2, 100);
    let mut events = processor.subscribe();
    processor.register_handler("echo", handler_fn(|task| async move { Ok(task.payload) }));

    let ids: Vec<_> = (0..5)
        .map(|i| processor.submit(TaskRequest::new("echo", json!(i))).unwrap())
        .collect();
    for id in &ids {
        processor.wait_for(*id).await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..5 {
        match events.recv().await.unwrap() {
            ConductorEvent::TaskCompleted { task_id, result } => {
                assert!(result.success);
                seen.push(task_id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    for id in ids {
        assert!(seen.contains(&id));
    }
    processor.stop();
}

#[tokio::test]
async fn metrics_reflect_completed_work() {
    let processor = processor_with(2, 100);
    processor.register_handler(
        "sleepy",
        handler_fn(|task| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(task.payload)
        }),
    );

    let ids: Vec<_> = (0..6)
        .map(|i| processor.submit(TaskRequest::new("sleepy", json!(i))).unwrap())
        .collect();
    for id in ids {
        processor.wait_for(id).await.unwrap();
    }

    let metrics = processor.metrics();
    assert_eq!(metrics.tasks_completed, 6);
    assert_eq!(metrics.tasks_failed, 0);
    assert!(metrics.average_processing_time_ms >= 15.0);
    assert_eq!(metrics.queue_depth, 0);
    processor.stop();
}
