use std::time::Instant;

use chrono::Utc;
use tokio::sync::RwLock;

use taskforge_core::models::WorkerMetrics;
use taskforge_core::traits::ResourceSample;

/// Worker自有的指标记录器，只由所属Worker写入，对外只提供快照
pub struct WorkerMetricsRecorder {
    worker_id: String,
    started_at: Instant,
    inner: RwLock<WorkerMetrics>,
}

impl WorkerMetricsRecorder {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            started_at: Instant::now(),
            inner: RwLock::new(WorkerMetrics::default()),
        }
    }

    pub async fn record_success(&self, execution_time_ms: u64) {
        let mut metrics = self.inner.write().await;
        metrics.tasks_processed += 1;
        metrics.total_execution_time_ms += execution_time_ms;
    }

    pub async fn record_failure(&self, execution_time_ms: u64) {
        let mut metrics = self.inner.write().await;
        metrics.tasks_processed += 1;
        metrics.tasks_failed += 1;
        metrics.total_execution_time_ms += execution_time_ms;
    }

    pub async fn record_resources(&self, sample: ResourceSample) {
        let mut metrics = self.inner.write().await;
        metrics.memory_usage_mb = sample.memory_mb;
        metrics.cpu_usage_percent = sample.cpu_percent;
    }

    pub async fn record_heartbeat(&self) {
        self.inner.write().await.last_heartbeat = Some(Utc::now());
    }

    pub async fn set_current_tasks(&self, current: usize) {
        let mut metrics = self.inner.write().await;
        metrics.current_tasks = current;
        metrics.peak_concurrent_tasks = metrics.peak_concurrent_tasks.max(current);
        metrics::gauge!("taskforge_worker_active_tasks", "worker" => self.worker_id.clone())
            .set(current as f64);
    }

    /// 带派生字段（平均耗时、错误率、吞吐量、运行时长）的快照
    pub async fn snapshot(&self) -> WorkerMetrics {
        let mut snapshot = self.inner.read().await.clone();
        let uptime = self.started_at.elapsed();
        snapshot.uptime_seconds = uptime.as_secs();

        if snapshot.tasks_processed > 0 {
            snapshot.average_execution_time_ms =
                snapshot.total_execution_time_ms as f64 / snapshot.tasks_processed as f64;
            snapshot.error_rate = snapshot.tasks_failed as f64 / snapshot.tasks_processed as f64;
        }

        let hours = uptime.as_secs_f64() / 3600.0;
        if hours > 0.0 {
            snapshot.throughput_per_hour = snapshot.tasks_processed as f64 / hours;
        }

        snapshot
    }
}
