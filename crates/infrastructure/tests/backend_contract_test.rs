use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use taskforge_core::config::{BackendConfig, InMemoryBackendConfig};
use taskforge_core::models::TaskDefinition;
use taskforge_core::traits::ExecutionBackend;
use taskforge_core::RetryPolicy;
use taskforge_infrastructure::{BackendFactory, InMemoryBackend};

fn definition(function: &str) -> TaskDefinition {
    TaskDefinition::new(function).with_id(uuid::Uuid::new_v4().to_string())
}

#[tokio::test]
async fn test_each_definition_dequeued_exactly_once() {
    let backend: Arc<dyn ExecutionBackend> = Arc::new(InMemoryBackend::default());

    let mut submitted = HashSet::new();
    for _ in 0..100 {
        let def = definition("work");
        submitted.insert(def.id.clone());
        backend.enqueue(&def).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let backend = backend.clone();
        handles.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(def) = backend.dequeue(&[], &[]).await.unwrap() {
                backend.ack(&def.id).await.unwrap();
                seen.push(def.id);
            }
            seen
        }));
    }

    let mut received = Vec::new();
    for handle in handles {
        received.extend(handle.await.unwrap());
    }

    assert_eq!(received.len(), 100);
    let unique: HashSet<_> = received.into_iter().collect();
    assert_eq!(unique, submitted);
}

#[tokio::test]
async fn test_delayed_tasks_promoted_in_eta_order() {
    let backend = InMemoryBackend::default();
    let now = Utc::now();

    let later = definition("work").with_eta(now + Duration::milliseconds(120));
    let sooner = definition("work").with_eta(now + Duration::milliseconds(60));
    backend.enqueue(&later).await.unwrap();
    backend.enqueue(&sooner).await.unwrap();

    assert!(backend.dequeue(&[], &[]).await.unwrap().is_none());
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let first = backend.dequeue(&[], &[]).await.unwrap().unwrap();
    let second = backend.dequeue(&[], &[]).await.unwrap().unwrap();
    assert_eq!(first.id, sooner.id);
    assert_eq!(second.id, later.id);
}

#[tokio::test]
async fn test_backpressure_releases_after_dequeue() {
    let backend = InMemoryBackend::new(InMemoryBackendConfig { max_queue_size: 2 });
    backend.enqueue(&definition("work")).await.unwrap();
    backend.enqueue(&definition("work")).await.unwrap();
    assert!(backend.enqueue(&definition("work")).await.is_err());

    backend.dequeue(&[], &[]).await.unwrap();
    assert!(backend.enqueue(&definition("work")).await.is_ok());
}

#[tokio::test]
async fn test_factory_default_is_in_memory() {
    let (backend, selection) =
        BackendFactory::create(&BackendConfig::default(), &RetryPolicy::default()).await;

    assert_eq!(backend.name(), "in_memory");
    assert!(!selection.degraded);
    assert_eq!(backend.depth().await.unwrap(), 0);
}
