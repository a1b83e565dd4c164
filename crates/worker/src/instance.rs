use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use taskforge_core::models::{WorkerConfiguration, WorkerMetrics, WorkerState, WorkerStatusReport};
use taskforge_core::traits::ResourceProbe;
use taskforge_core::{EngineError, EngineResult};
use taskforge_queue::TaskQueue;

use crate::components::{HeartbeatManager, ResourceGuard, TaskExecutionManager};
use crate::metrics::WorkerMetricsRecorder;

/// 单个Worker实例
///
/// 状态机：`Starting → Running ⇄ (Idle | Busy) → Stopping → Stopped`，
/// 启动时资源超限进入 `Error`。启动后运行三个循环：心跳、资源监控、任务分发；
/// 任务在独立的tokio任务中执行，并发数受信号量约束。
pub struct WorkerInstance {
    config: WorkerConfiguration,
    queue: Arc<TaskQueue>,
    state: RwLock<WorkerState>,
    metrics: Arc<WorkerMetricsRecorder>,
    execution: Arc<TaskExecutionManager>,
    resources: Arc<ResourceGuard>,
    accepting: AtomicBool,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
    loop_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerInstance {
    pub fn new(
        config: WorkerConfiguration,
        queue: Arc<TaskQueue>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Arc<Self> {
        let metrics = Arc::new(WorkerMetricsRecorder::new(config.worker_id.clone()));
        let execution = Arc::new(TaskExecutionManager::new(
            config.worker_id.clone(),
            Arc::clone(&queue),
            Arc::clone(&metrics),
            config.max_concurrent_tasks,
            Duration::from_secs(config.task_timeout_seconds),
        ));
        let resources = Arc::new(ResourceGuard::new(
            probe,
            config.max_memory_mb,
            config.max_cpu_percent,
        ));

        Arc::new(Self {
            config,
            queue,
            state: RwLock::new(WorkerState::Starting),
            metrics,
            execution,
            resources,
            accepting: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
            loop_handles: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn config(&self) -> &WorkerConfiguration {
        &self.config
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, next: WorkerState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!("Worker {} 状态: {} -> {}", self.config.worker_id, *state, next);
            *state = next;
        }
    }

    pub async fn metrics(&self) -> WorkerMetrics {
        self.metrics.snapshot().await
    }

    /// 立即中止在途任务并按 `WorkerShutdown` 上报，返回中止数量
    pub async fn abort_in_flight(&self) -> usize {
        self.execution.abort_all().await
    }

    pub async fn current_task_count(&self) -> usize {
        self.execution.current_task_count().await
    }

    pub async fn running_task_ids(&self) -> Vec<String> {
        self.execution.running_task_ids().await
    }

    pub async fn status_report(&self) -> WorkerStatusReport {
        WorkerStatusReport {
            worker_id: self.config.worker_id.clone(),
            worker_type: self.config.worker_type.clone(),
            state: self.state().await,
            max_concurrent_tasks: self.config.max_concurrent_tasks,
            metrics: self.metrics().await,
        }
    }

    /// 启动Worker：检查资源上限后启动心跳、资源监控、任务分发三个循环
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        if self.state().await != WorkerState::Starting {
            return Err(EngineError::Internal(format!(
                "Worker {} 已启动过",
                self.config.worker_id
            )));
        }

        info!(
            "启动Worker: {} (类型: {}, 最大并发: {}, 队列: {:?})",
            self.config.worker_id,
            self.config.worker_type,
            self.config.max_concurrent_tasks,
            self.config.queues
        );

        let (sample, breach) = self.resources.check();
        self.metrics.record_resources(sample).await;
        if let Some(reason) = breach {
            error!("Worker {} 启动时资源超限: {}", self.config.worker_id, reason);
            self.set_state(WorkerState::Error).await;
            return Err(EngineError::ResourceCeilingExceeded(reason));
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let heartbeat = HeartbeatManager::new(
            self.config.worker_id.clone(),
            Duration::from_secs(self.config.heartbeat_interval_seconds),
            Arc::clone(&self.metrics),
            Arc::clone(&self.execution),
        )
        .spawn(shutdown_tx.subscribe());
        let monitor = self.resources.spawn_monitor(
            self.config.worker_id.clone(),
            Duration::from_secs(self.config.resource_check_interval_seconds),
            Arc::clone(&self.metrics),
            shutdown_tx.subscribe(),
        );
        let dispatch = self.spawn_dispatch_loop(shutdown_tx.subscribe());

        *self.shutdown_tx.lock().await = Some(shutdown_tx);
        self.loop_handles
            .lock()
            .await
            .extend([heartbeat, monitor, dispatch]);

        self.accepting.store(true, Ordering::SeqCst);
        self.set_state(WorkerState::Running).await;
        info!("Worker {} 已启动", self.config.worker_id);
        Ok(())
    }

    fn spawn_dispatch_loop(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        tokio::spawn(async move {
            let mut poll = interval(poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = poll.tick() => {
                        worker.poll_once().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Worker {} 分发循环退出", worker.config.worker_id);
                        break;
                    }
                }
            }
        })
    }

    /// 一轮分发：在有空闲槽位且资源未超限时持续领取任务，返回本轮分发的数量
    pub async fn poll_once(&self) -> usize {
        let mut dispatched = 0;

        while self.accepting.load(Ordering::SeqCst) {
            if self.resources.is_breached() {
                self.set_state(WorkerState::Idle).await;
                return dispatched;
            }

            let Some(permit) = self.execution.try_reserve() else {
                break;
            };

            match self
                .queue
                .backend()
                .dequeue(&self.config.queues, &self.config.task_types)
                .await
            {
                Ok(Some(definition)) => {
                    self.execution.dispatch(definition, permit).await;
                    dispatched += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Worker {} 领取任务失败: {}", self.config.worker_id, e);
                    break;
                }
            }
        }

        if self.accepting.load(Ordering::SeqCst) {
            let next = if self.execution.current_task_count().await > 0 {
                WorkerState::Busy
            } else {
                WorkerState::Idle
            };
            self.set_state(next).await;
        }

        dispatched
    }

    /// 停止Worker
    ///
    /// 立即停止领取新任务；`graceful` 时最多等待 `timeout` 让在途任务完成，
    /// 剩余任务被中止并以 `WorkerShutdown` 上报，由重试策略决定是否重新入队。
    pub async fn stop(&self, graceful: bool, timeout: Duration) -> EngineResult<()> {
        {
            let state = self.state().await;
            if matches!(state, WorkerState::Stopped | WorkerState::Stopping) {
                return Ok(());
            }
        }

        info!(
            "停止Worker: {} (优雅: {}, 超时: {:?})",
            self.config.worker_id, graceful, timeout
        );
        self.accepting.store(false, Ordering::SeqCst);
        self.set_state(WorkerState::Stopping).await;

        if let Some(shutdown_tx) = self.shutdown_tx.lock().await.take() {
            let _ = shutdown_tx.send(());
        }
        let handles: Vec<JoinHandle<()>> = self.loop_handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker {} 后台循环异常退出: {}", self.config.worker_id, e);
            }
        }

        if graceful && !self.execution.wait_idle(timeout).await {
            warn!(
                "Worker {} 在 {:?} 内未能完成所有在途任务",
                self.config.worker_id, timeout
            );
        }

        let aborted = self.execution.abort_all().await;
        if aborted > 0 {
            warn!("Worker {} 中止了 {} 个在途任务", self.config.worker_id, aborted);
        }
        self.execution.close();

        self.set_state(WorkerState::Stopped).await;
        info!("Worker {} 已停止", self.config.worker_id);
        Ok(())
    }
}
