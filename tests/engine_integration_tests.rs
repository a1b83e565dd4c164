use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing_test::traced_test;

use taskforge::{
    builtin, handler_fn, AppConfig, EngineError, TaskContext, TaskDefinition, TaskEngine,
    TaskStatus,
};
use taskforge_core::config::BackendKind;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.manager.min_workers = 1;
    config.manager.max_workers = 2;
    config.manager.scale_interval_seconds = 3600;
    config.manager.drain_timeout_seconds = 5;
    config.worker.poll_interval_ms = 10;
    config.worker.heartbeat_interval_seconds = 1;
    config.worker.resource_check_interval_seconds = 1;
    config.worker.max_concurrent_tasks = 2;
    config
}

async fn engine() -> TaskEngine {
    let mut builder = TaskEngine::builder(test_config()).register(
        "always_fails",
        handler_fn(|_ctx: TaskContext| async {
            Err::<serde_json::Value, _>(EngineError::handler("permanent failure"))
        }),
    );
    for (name, handler) in builtin::all() {
        builder = builder.register(name, handler);
    }
    builder.build().await.unwrap()
}

async fn wait_for(engine: &TaskEngine, task_id: &str, expected: TaskStatus) {
    for _ in 0..300 {
        if engine.get_status(task_id).await.map(|r| r.status) == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "task {task_id} stuck in {:?}",
        engine.get_status(task_id).await.map(|r| r.status)
    );
}

#[tokio::test]
#[traced_test]
async fn test_submit_and_complete_echo() {
    let engine = engine().await;

    let id = engine
        .submit(TaskDefinition::new(builtin::ECHO).with_args(vec![json!("hello")]))
        .await
        .unwrap();
    wait_for(&engine, &id, TaskStatus::Completed).await;

    let record = engine.get_status(&id).await.unwrap();
    assert_eq!(record.result.unwrap()["args"], json!(["hello"]));
    assert!(record.execution_time_ms.is_some());
    assert!(record.worker_id.is_some());

    let stats = engine.stats().await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.by_function.get(builtin::ECHO), Some(&1));

    engine.shutdown(true).await.unwrap();
    assert!(logs_contain("任务引擎已关闭"));
}

#[tokio::test]
async fn test_unregistered_function_rejected_at_submit() {
    let engine = engine().await;

    let err = engine
        .submit(TaskDefinition::new("does.not.exist"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnregisteredFunction { .. }));
    assert_eq!(engine.stats().await.total_tasks, 0);

    engine.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_failed_task_can_be_retried_manually() {
    let engine = engine().await;

    let id = engine
        .submit(TaskDefinition::new("always_fails").with_max_retries(0))
        .await
        .unwrap();
    wait_for(&engine, &id, TaskStatus::Failed).await;

    let new_id = engine.retry_task(&id).await.unwrap().unwrap();
    assert_ne!(new_id, id);
    assert!(new_id.starts_with(&format!("{id}-retry-")));

    let retried = engine.get_status(&new_id).await.unwrap();
    assert_eq!(retried.metadata["original_task_id"], json!(id));
    assert_eq!(retried.retry_count, 1);
    wait_for(&engine, &new_id, TaskStatus::Failed).await;

    let original = engine.get_status(&id).await.unwrap();
    assert_eq!(original.status, TaskStatus::Failed);

    engine.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_retry_rejected_for_completed_task() {
    let engine = engine().await;

    let id = engine.submit(TaskDefinition::new(builtin::ECHO)).await.unwrap();
    wait_for(&engine, &id, TaskStatus::Completed).await;

    assert!(!engine.retry(&id).await);
    assert!(!engine.retry("unknown").await);

    engine.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_cancel_delayed_task_before_it_runs() {
    let engine = engine().await;

    let id = engine
        .submit(
            TaskDefinition::new(builtin::ECHO)
                .with_eta(Utc::now() + chrono::Duration::seconds(60)),
        )
        .await
        .unwrap();
    assert_eq!(engine.get_status(&id).await.unwrap().status, TaskStatus::Pending);

    assert!(engine.cancel(&id).await);
    assert!(!engine.cancel(&id).await);

    let record = engine.get_status(&id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Cancelled);
    assert!(record.started_at.is_none());
    assert_eq!(engine.queue().backend().depth().await.unwrap(), 0);

    engine.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_eta_delays_execution() {
    let engine = engine().await;

    let id = engine
        .submit(
            TaskDefinition::new(builtin::ECHO)
                .with_eta(Utc::now() + chrono::Duration::milliseconds(400)),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(engine.get_status(&id).await.unwrap().status, TaskStatus::Pending);

    wait_for(&engine, &id, TaskStatus::Completed).await;
    engine.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_expired_task_fails_without_running() {
    let engine = engine().await;

    let id = engine
        .submit(
            TaskDefinition::new(builtin::ECHO)
                .with_expires_at(Utc::now() - chrono::Duration::seconds(1)),
        )
        .await
        .unwrap();
    wait_for(&engine, &id, TaskStatus::Failed).await;

    let record = engine.get_status(&id).await.unwrap();
    assert!(record.result.is_none());
    assert_eq!(record.retry_count, 0);

    engine.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_cancel_running_sleep_task() {
    let engine = engine().await;

    let id = engine
        .submit(TaskDefinition::new(builtin::SLEEP).with_kwarg("seconds", json!(30)))
        .await
        .unwrap();
    wait_for(&engine, &id, TaskStatus::Running).await;

    assert!(engine.cancel(&id).await);
    assert_eq!(engine.get_status(&id).await.unwrap().status, TaskStatus::Cancelled);
    assert_eq!(engine.stats().await.cancelled, 1);

    engine.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_cleanup_removes_finished_history() {
    let engine = engine().await;

    let id = engine.submit(TaskDefinition::new(builtin::ECHO)).await.unwrap();
    wait_for(&engine, &id, TaskStatus::Completed).await;

    assert_eq!(engine.cleanup(7).await, 0);
    assert_eq!(engine.cleanup(0).await, 1);
    assert!(engine.get_status(&id).await.is_none());

    engine.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_worker_status_reports_pool() {
    let engine = engine().await;

    let status = engine.worker_status().await;
    assert_eq!(status.total_workers, 1);
    assert_eq!(status.min_workers, 1);
    assert_eq!(status.max_workers, 2);
    assert_eq!(status.aggregate.capacity, 2);

    engine.resize_workers(2, 3).await.unwrap();
    assert_eq!(engine.worker_status().await.total_workers, 2);

    engine.shutdown(true).await.unwrap();
    engine.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_many_tasks_all_complete() {
    let engine = Arc::new(engine().await);

    let mut ids = Vec::new();
    for i in 0..25 {
        ids.push(
            engine
                .submit(TaskDefinition::new(builtin::ECHO).with_args(vec![json!(i)]))
                .await
                .unwrap(),
        );
    }
    engine.evaluate_scaling().await.unwrap();

    for id in &ids {
        wait_for(&engine, id, TaskStatus::Completed).await;
    }
    let status = engine.worker_status().await;
    assert_eq!(status.aggregate.tasks_processed, 25);
    assert!(status.total_workers <= 2);

    engine.shutdown(true).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_unreachable_redis_degrades_to_in_memory() {
    let mut config = test_config();
    config.backend.kind = BackendKind::Redis;
    config.backend.redis.url = "redis://127.0.0.1:1/0".to_string();
    config.backend.redis.max_retry_attempts = 1;
    config.backend.redis.connection_timeout_seconds = 1;

    let engine = TaskEngine::builder(config)
        .register(builtin::ECHO, builtin::echo())
        .build()
        .await
        .unwrap();

    let selection = engine.backend_selection();
    assert!(selection.degraded);
    assert_eq!(selection.kind, BackendKind::InMemory);

    let id = engine.submit(TaskDefinition::new(builtin::ECHO)).await.unwrap();
    wait_for(&engine, &id, TaskStatus::Completed).await;
    assert!(logs_contain("降级"));

    engine.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_invalid_config_rejected_by_builder() {
    let mut config = test_config();
    config.manager.min_workers = 5;
    config.manager.max_workers = 1;

    let result = TaskEngine::builder(config).build().await;
    assert!(matches!(result, Err(EngineError::Configuration(_))));
}

#[tokio::test]
async fn test_engine_from_toml_config() {
    let config = AppConfig::from_toml(
        r#"
        [manager]
        min_workers = 2
        max_workers = 3

        [worker]
        worker_id = "toml-worker"
        poll_interval_ms = 10
        "#,
    )
    .unwrap();

    let engine = TaskEngine::builder(config)
        .register(builtin::ECHO, builtin::echo())
        .build()
        .await
        .unwrap();

    let status = engine.worker_status().await;
    assert_eq!(status.total_workers, 2);
    assert!(status
        .workers
        .iter()
        .all(|w| w.worker_id.starts_with("toml-worker-")));

    engine.shutdown(false).await.unwrap();
}

#[test]
fn test_sample_config_matches_defaults() {
    let config = AppConfig::from_toml(include_str!("../config/taskforge.toml")).unwrap();
    assert_eq!(config, AppConfig::default());
}
