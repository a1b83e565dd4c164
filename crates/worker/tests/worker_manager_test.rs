use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use taskforge_core::config::{ManagerConfig, QueueConfig};
use taskforge_core::models::{TaskDefinition, TaskStatus, WorkerConfiguration, WorkerState};
use taskforge_core::traits::{handler_fn, ResourceProbe, ResourceSample, TaskContext};
use taskforge_core::{EngineError, RetryPolicy};
use taskforge_infrastructure::InMemoryBackend;
use taskforge_queue::{TaskQueue, TaskRegistry};
use taskforge_worker::WorkerManager;

struct FixedProbe;

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> ResourceSample {
        ResourceSample {
            memory_mb: 32.0,
            cpu_percent: 1.0,
        }
    }
}

fn queue() -> Arc<TaskQueue> {
    Arc::new(TaskQueue::new(
        TaskRegistry::new(),
        Arc::new(InMemoryBackend::default()),
        RetryPolicy::default(),
        QueueConfig::default(),
    ))
}

fn manager_config(min_workers: usize, max_workers: usize) -> ManagerConfig {
    ManagerConfig {
        min_workers,
        max_workers,
        scale_interval_seconds: 3600,
        drain_timeout_seconds: 5,
        ..Default::default()
    }
}

/// 只处理 `task_types` 中的函数，其它任务在队列中保持等待
fn template(task_types: &[&str]) -> WorkerConfiguration {
    WorkerConfiguration {
        worker_id: "pool".to_string(),
        max_concurrent_tasks: 1,
        poll_interval_ms: 10,
        heartbeat_interval_seconds: 1,
        resource_check_interval_seconds: 1,
        task_types: task_types.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

async fn start(
    queue: &Arc<TaskQueue>,
    config: ManagerConfig,
    template: WorkerConfiguration,
) -> WorkerManager {
    WorkerManager::start(config, template, Arc::clone(queue), Arc::new(FixedProbe))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_start_brings_up_minimum_workers() {
    let queue = queue();
    let manager = start(&queue, manager_config(2, 4), template(&[])).await;

    assert_eq!(manager.pool_size(), 2);
    let mut ids: Vec<String> = manager
        .workers()
        .iter()
        .map(|w| w.id().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["pool-1".to_string(), "pool-2".to_string()]);

    let status = manager.worker_status().await;
    assert_eq!(status.total_workers, 2);
    assert_eq!(status.min_workers, 2);
    assert_eq!(status.max_workers, 4);
    assert_eq!(status.aggregate.capacity, 2);

    manager.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_pool_scales_up_then_back_down() {
    let queue = queue();
    let manager = start(&queue, manager_config(1, 4), template(&["other"])).await;

    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(queue.submit(TaskDefinition::new("backlog")).await.unwrap());
    }

    let report = manager.evaluate().await.unwrap();
    assert_eq!(report.pending, 20);
    assert_eq!(report.pool_size_before, 1);
    assert_eq!(report.pool_size_after, 4);
    assert_eq!(manager.pool_size(), 4);

    let report = manager.evaluate().await.unwrap();
    assert_eq!(report.pool_size_after, 4);

    for id in &ids {
        assert!(queue.cancel(id).await);
    }

    let mut sizes = Vec::new();
    for _ in 0..4 {
        sizes.push(manager.evaluate().await.unwrap().pool_size_after);
    }
    assert_eq!(sizes, vec![3, 2, 1, 1]);

    manager.shutdown(true).await.unwrap();
    assert_eq!(manager.pool_size(), 0);
}

#[tokio::test]
async fn test_busy_pool_is_not_shrunk() {
    let queue = queue();
    queue
        .register(
            "hold",
            handler_fn(|ctx: TaskContext| async move {
                ctx.cancelled().await;
                Ok::<_, EngineError>(json!(null))
            }),
        )
        .await;

    let manager = start(&queue, manager_config(2, 3), template(&[])).await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        ids.push(queue.submit(TaskDefinition::new("hold")).await.unwrap());
    }
    for _ in 0..200 {
        if queue.stats().await.running == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(queue.stats().await.running, 2);
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.resize(1, 3).await.unwrap();
    let report = manager.evaluate().await.unwrap();
    assert_eq!(report.decision, "Hold");
    assert!((report.busy_fraction - 1.0).abs() < f64::EPSILON);
    assert_eq!(manager.pool_size(), 2);

    for id in &ids {
        queue.cancel(id).await;
    }
    manager.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_retired_worker_finishes_in_flight_task() {
    let queue = queue();
    queue
        .register(
            "steady",
            handler_fn(|_ctx: TaskContext| async {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                Ok::<_, EngineError>(json!("done"))
            }),
        )
        .await;

    // 排空超时短于任务耗时，缩容仍须等到任务完成
    let config = ManagerConfig {
        drain_timeout_seconds: 1,
        ..manager_config(2, 2)
    };
    let worker_template = WorkerConfiguration {
        task_timeout_seconds: 10,
        ..template(&[])
    };
    let manager = start(&queue, config, worker_template).await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        ids.push(
            queue
                .submit(TaskDefinition::new("steady").with_max_retries(0))
                .await
                .unwrap(),
        );
    }
    for _ in 0..200 {
        if queue.stats().await.running == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(queue.stats().await.running, 2);

    manager.resize(1, 1).await.unwrap();
    assert_eq!(manager.pool_size(), 1);
    let draining = manager.draining();
    assert_eq!(draining.len(), 1);
    let retired = Arc::clone(&draining[0]);
    assert_eq!(retired.current_task_count().await, 1);
    assert_eq!(manager.worker_status().await.total_workers, 2);

    let mut retired_task = None;
    for id in &ids {
        let record = queue.get_status(id).await.unwrap();
        if record.worker_id.as_deref() == Some(retired.id()) {
            retired_task = Some(id.clone());
        }
    }
    let retired_task = retired_task.unwrap();

    // 任务完成前Worker一直留在排空集合中
    loop {
        let still_draining = manager.draining().iter().any(|w| w.id() == retired.id());
        let record = queue.get_status(&retired_task).await.unwrap();
        if record.status == TaskStatus::Completed {
            assert_eq!(record.retry_count, 0);
            break;
        }
        assert_eq!(record.status, TaskStatus::Running);
        assert!(still_draining);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for _ in 0..200 {
        if manager.draining().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(manager.draining().is_empty());
    assert_eq!(retired.state().await, WorkerState::Stopped);
    let metrics = retired.metrics().await;
    assert_eq!(metrics.tasks_processed, 1);
    assert_eq!(metrics.tasks_failed, 0);

    for id in &ids {
        for _ in 0..200 {
            if queue.get_status(id).await.map(|r| r.status) == Some(TaskStatus::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let record = queue.get_status(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.retry_count, 0);
    }
    manager.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_dead_worker_is_reaped_and_replaced() {
    let queue = queue();
    let manager = start(&queue, manager_config(2, 4), template(&[])).await;

    let victim = manager.workers()[0].clone();
    victim.stop(false, Duration::from_millis(10)).await.unwrap();
    assert_eq!(victim.state().await, WorkerState::Stopped);

    let report = manager.evaluate().await.unwrap();
    assert_eq!(report.reaped, 1);
    assert_eq!(manager.pool_size(), 2);
    assert!(manager.workers().iter().all(|w| w.id() != victim.id()));

    manager.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_resize_validates_bounds() {
    let queue = queue();
    let manager = start(&queue, manager_config(1, 4), template(&[])).await;

    manager.resize(3, 5).await.unwrap();
    assert_eq!(manager.pool_size(), 3);
    assert_eq!(manager.worker_status().await.max_workers, 5);

    let err = manager.resize(5, 2).await.unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
    assert_eq!(manager.pool_size(), 3);

    manager.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_every_worker() {
    let queue = queue();
    let manager = start(&queue, manager_config(3, 3), template(&[])).await;
    let workers = manager.workers();

    manager.shutdown(true).await.unwrap();

    for worker in workers {
        assert_eq!(worker.state().await, WorkerState::Stopped);
    }
    assert!(manager.evaluate().await.is_err());
}

#[tokio::test]
async fn test_invalid_manager_config_rejected() {
    let queue = queue();
    let result = WorkerManager::start(
        manager_config(5, 2),
        template(&[]),
        queue,
        Arc::new(FixedProbe),
    )
    .await;

    assert!(matches!(result, Err(EngineError::Configuration(_))));
}
