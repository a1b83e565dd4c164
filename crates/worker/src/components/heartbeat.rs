use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::metrics::WorkerMetricsRecorder;

use super::TaskExecutionManager;

/// 心跳循环：定期刷新心跳时间与在途任务数
pub struct HeartbeatManager {
    worker_id: String,
    heartbeat_interval: Duration,
    metrics: Arc<WorkerMetricsRecorder>,
    execution: Arc<TaskExecutionManager>,
}

impl HeartbeatManager {
    pub fn new(
        worker_id: String,
        heartbeat_interval: Duration,
        metrics: Arc<WorkerMetricsRecorder>,
        execution: Arc<TaskExecutionManager>,
    ) -> Self {
        Self {
            worker_id,
            heartbeat_interval,
            metrics,
            execution,
        }
    }

    pub fn spawn(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut heartbeat_interval = interval(self.heartbeat_interval);

            loop {
                tokio::select! {
                    _ = heartbeat_interval.tick() => {
                        let current = self.execution.current_task_count().await;
                        self.metrics.record_heartbeat().await;
                        debug!("Worker {} 心跳，在途任务: {}", self.worker_id, current);
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Worker {} 心跳循环退出", self.worker_id);
                        break;
                    }
                }
            }
        })
    }
}
