use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

use taskforge_core::traits::{ResourceProbe, ResourceSample};

use crate::metrics::WorkerMetricsRecorder;

/// 资源上限检查
///
/// 监控循环定期采样并更新超限标记，分发循环只读取标记，不在每次轮询时采样。
pub struct ResourceGuard {
    probe: Arc<dyn ResourceProbe>,
    max_memory_mb: Option<u64>,
    max_cpu_percent: Option<f64>,
    breached: AtomicBool,
}

impl ResourceGuard {
    pub fn new(
        probe: Arc<dyn ResourceProbe>,
        max_memory_mb: Option<u64>,
        max_cpu_percent: Option<f64>,
    ) -> Self {
        Self {
            probe,
            max_memory_mb,
            max_cpu_percent,
            breached: AtomicBool::new(false),
        }
    }

    /// 采样一次并更新超限标记，返回样本和超限描述
    pub fn check(&self) -> (ResourceSample, Option<String>) {
        let sample = self.probe.sample();
        let breach = sample.breach(self.max_memory_mb, self.max_cpu_percent);
        self.breached.store(breach.is_some(), Ordering::SeqCst);
        (sample, breach)
    }

    pub fn is_breached(&self) -> bool {
        self.breached.load(Ordering::SeqCst)
    }

    pub fn spawn_monitor(
        self: &Arc<Self>,
        worker_id: String,
        check_interval: Duration,
        metrics: Arc<WorkerMetricsRecorder>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let guard = Arc::clone(self);
        tokio::spawn(async move {
            let mut check_interval = interval(check_interval);

            loop {
                tokio::select! {
                    _ = check_interval.tick() => {
                        let was_breached = guard.is_breached();
                        let (sample, breach) = guard.check();
                        metrics.record_resources(sample).await;

                        match (was_breached, breach) {
                            (false, Some(reason)) => {
                                warn!("Worker {} 资源超限，暂停领取任务: {}", worker_id, reason);
                            }
                            (true, None) => info!("Worker {} 资源恢复，继续领取任务", worker_id),
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Worker {} 资源监控循环退出", worker_id);
                        break;
                    }
                }
            }
        })
    }
}
