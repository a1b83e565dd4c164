use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use taskforge_core::config::ManagerConfig;
use taskforge_core::models::{WorkerConfiguration, WorkerPoolStatus, WorkerState};
use taskforge_core::traits::ResourceProbe;
use taskforge_core::{EngineError, EngineResult};
use taskforge_queue::TaskQueue;

use crate::instance::WorkerInstance;
use crate::scaling::{ScalingDecision, ScalingPolicy};

/// 发给池控制循环的命令
pub enum PoolCommand {
    /// 立即执行一轮伸缩检查
    Evaluate(oneshot::Sender<ScalingReport>),
    /// 调整上下限后执行一轮检查
    Resize {
        min_workers: usize,
        max_workers: usize,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    /// 缩容中的Worker已停止
    Retired { worker_id: String },
    Shutdown {
        graceful: bool,
        reply: oneshot::Sender<()>,
    },
}

/// 一轮伸缩检查的结果
#[derive(Debug, Clone, Serialize)]
pub struct ScalingReport {
    pub pool_size_before: usize,
    pub pool_size_after: usize,
    pub pending: usize,
    pub busy_fraction: f64,
    pub reaped: usize,
    pub decision: String,
}

/// 控制循环发布的池成员快照
#[derive(Clone, Default)]
pub struct PoolMembers {
    pub active: Vec<Arc<WorkerInstance>>,
    /// 正在优雅停止、尚未移出的Worker
    pub draining: Vec<Arc<WorkerInstance>>,
    pub min_workers: usize,
    pub max_workers: usize,
}

/// 池控制循环：独占池成员的写权限，其它组件只通过命令和快照与它交互
struct PoolController {
    config: ManagerConfig,
    template: WorkerConfiguration,
    queue: Arc<TaskQueue>,
    probe: Arc<dyn ResourceProbe>,
    policy: ScalingPolicy,
    workers: Vec<Arc<WorkerInstance>>,
    draining: HashMap<String, Arc<WorkerInstance>>,
    drain_handles: Vec<JoinHandle<()>>,
    next_index: usize,
    commands_tx: mpsc::Sender<PoolCommand>,
    members_tx: watch::Sender<PoolMembers>,
}

impl PoolController {
    fn publish(&self) {
        self.members_tx.send_replace(PoolMembers {
            active: self.workers.clone(),
            draining: self.draining.values().cloned().collect(),
            min_workers: self.config.min_workers,
            max_workers: self.config.max_workers,
        });
        metrics::gauge!("taskforge_worker_pool_size").set(self.workers.len() as f64);
    }

    async fn spawn_worker(&mut self) -> EngineResult<()> {
        self.next_index += 1;
        let worker_id = format!("{}-{}", self.template.worker_id, self.next_index);
        let worker = WorkerInstance::new(
            self.template.for_worker(worker_id.clone()),
            Arc::clone(&self.queue),
            Arc::clone(&self.probe),
        );

        worker.start().await?;
        self.workers.push(worker);
        debug!("Worker {} 加入池", worker_id);
        Ok(())
    }

    async fn add_workers(&mut self, count: usize) -> usize {
        let mut added = 0;
        for _ in 0..count {
            if self.workers.len() >= self.config.max_workers {
                break;
            }
            match self.spawn_worker().await {
                Ok(()) => added += 1,
                Err(e) => {
                    error!("启动Worker失败: {}", e);
                    break;
                }
            }
        }
        added
    }

    /// 移除已停止或出错的Worker，开启自动重启时补上同等数量
    async fn reap(&mut self) -> usize {
        let mut dead = Vec::new();
        for worker in &self.workers {
            if matches!(worker.state().await, WorkerState::Error | WorkerState::Stopped) {
                dead.push(worker.id().to_string());
            }
        }
        if dead.is_empty() {
            return 0;
        }

        self.workers.retain(|worker| !dead.contains(&worker.id().to_string()));
        warn!("移除了 {} 个失效的Worker: {:?}", dead.len(), dead);

        if self.template.auto_restart {
            let restarted = self.add_workers(dead.len()).await;
            info!("自动重启了 {} 个Worker", restarted);
        }
        dead.len()
    }

    async fn ensure_minimum(&mut self) {
        let missing = self.config.min_workers.saturating_sub(self.workers.len());
        if missing > 0 {
            let added = self.add_workers(missing).await;
            info!("补足最小Worker数: 新增 {} 个 (当前: {})", added, self.workers.len());
        }
    }

    async fn busy_fraction(&self) -> f64 {
        if self.workers.is_empty() {
            return 0.0;
        }
        let mut busy = 0;
        for worker in &self.workers {
            if worker.state().await == WorkerState::Busy {
                busy += 1;
            }
        }
        busy as f64 / self.workers.len() as f64
    }

    /// 选出在途任务最少的Worker优雅停止，停止完成后才从池中移出
    async fn retire_one(&mut self) {
        let mut candidate: Option<(usize, usize)> = None;
        for (index, worker) in self.workers.iter().enumerate() {
            let load = worker.current_task_count().await;
            if candidate.map_or(true, |(_, best)| load < best) {
                candidate = Some((index, load));
            }
        }
        let Some((index, _)) = candidate else {
            return;
        };

        let worker = self.workers.remove(index);
        let worker_id = worker.id().to_string();
        self.draining.insert(worker_id.clone(), Arc::clone(&worker));
        info!("缩容: 优雅停止Worker {}", worker_id);

        // 缩容等待不短于单任务超时，在途任务总能跑完
        let commands_tx = self.commands_tx.clone();
        let drain_timeout = Duration::from_secs(
            self.config
                .drain_timeout_seconds
                .max(self.template.task_timeout_seconds),
        );
        self.drain_handles.push(tokio::spawn(async move {
            if let Err(e) = worker.stop(true, drain_timeout).await {
                warn!("Worker {} 停止出错: {}", worker_id, e);
            }
            let _ = commands_tx.send(PoolCommand::Retired { worker_id }).await;
        }));
    }

    async fn evaluate(&mut self) -> ScalingReport {
        let pool_size_before = self.workers.len();
        let reaped = self.reap().await;
        self.ensure_minimum().await;

        let pending = self.queue.pending_count().await;
        let busy_fraction = self.busy_fraction().await;
        let decision = self.policy.decide(self.workers.len(), pending, busy_fraction);

        match decision {
            ScalingDecision::ScaleUp(count) => {
                let added = self.add_workers(count).await;
                info!(
                    "扩容: 等待任务 {}，新增 {} 个Worker (当前: {})",
                    pending,
                    added,
                    self.workers.len()
                );
            }
            ScalingDecision::ScaleDown => self.retire_one().await,
            ScalingDecision::Hold => {}
        }

        self.publish();
        debug!(
            "伸缩检查: 等待 {}，忙碌比例 {:.2}，决策 {:?}，池大小 {}",
            pending,
            busy_fraction,
            decision,
            self.workers.len()
        );

        ScalingReport {
            pool_size_before,
            pool_size_after: self.workers.len(),
            pending,
            busy_fraction,
            reaped,
            decision: format!("{decision:?}"),
        }
    }

    async fn shutdown(&mut self, graceful: bool) {
        let timeout = Duration::from_secs(self.config.drain_timeout_seconds);
        let workers: Vec<Arc<WorkerInstance>> = self.workers.drain(..).collect();
        info!("关闭Worker池: {} 个Worker (优雅: {})", workers.len(), graceful);

        let results = join_all(workers.iter().map(|worker| worker.stop(graceful, timeout))).await;
        for (worker, result) in workers.iter().zip(results) {
            if let Err(e) = result {
                warn!("Worker {} 停止出错: {}", worker.id(), e);
            }
        }

        let mut drains: Vec<JoinHandle<()>> = self.drain_handles.drain(..).collect();
        if !drains.is_empty() {
            let wait = if graceful { timeout } else { Duration::ZERO };
            let finished = tokio::time::timeout(wait, join_all(drains.iter_mut())).await;
            if finished.is_err() {
                for worker in self.draining.values() {
                    let aborted = worker.abort_in_flight().await;
                    if aborted > 0 {
                        warn!("关闭时中止排空中Worker {} 的 {} 个在途任务", worker.id(), aborted);
                    }
                }
                for handle in drains.into_iter().filter(|h| !h.is_finished()) {
                    let _ = handle.await;
                }
            }
        }
        self.draining.clear();
        self.publish();
    }

    async fn run(
        mut self,
        mut commands_rx: mpsc::Receiver<PoolCommand>,
    ) {
        let mut ticker = interval(Duration::from_secs(self.config.scale_interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate().await;
                }
                command = commands_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    match command {
                        PoolCommand::Evaluate(reply) => {
                            let report = self.evaluate().await;
                            let _ = reply.send(report);
                        }
                        PoolCommand::Resize { min_workers, max_workers, reply } => {
                            if min_workers > max_workers || max_workers == 0 {
                                let _ = reply.send(Err(EngineError::Configuration(format!(
                                    "无效的Worker数量范围: {min_workers}..={max_workers}"
                                ))));
                                continue;
                            }
                            self.config.min_workers = min_workers;
                            self.config.max_workers = max_workers;
                            self.policy = ScalingPolicy::from_config(&self.config);
                            info!("调整Worker数量范围: {}..={}", min_workers, max_workers);
                            self.evaluate().await;
                            let _ = reply.send(Ok(()));
                        }
                        PoolCommand::Retired { worker_id } => {
                            self.draining.remove(&worker_id);
                            self.drain_handles.retain(|handle| !handle.is_finished());
                            self.publish();
                            info!("Worker {} 已移出池", worker_id);
                        }
                        PoolCommand::Shutdown { graceful, reply } => {
                            self.shutdown(graceful).await;
                            let _ = reply.send(());
                            break;
                        }
                    }
                }
            }
        }

        debug!("Worker池控制循环退出");
    }
}

/// Worker管理器：池控制循环的句柄
pub struct WorkerManager {
    commands_tx: mpsc::Sender<PoolCommand>,
    members_rx: watch::Receiver<PoolMembers>,
    control_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerManager {
    /// 启动管理器：先同步补足最小Worker数，再启动控制循环
    pub async fn start(
        config: ManagerConfig,
        template: WorkerConfiguration,
        queue: Arc<TaskQueue>,
        probe: Arc<dyn ResourceProbe>,
    ) -> EngineResult<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        template
            .validate()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (members_tx, members_rx) = watch::channel(PoolMembers::default());

        let mut controller = PoolController {
            policy: ScalingPolicy::from_config(&config),
            config,
            template,
            queue,
            probe,
            workers: Vec::new(),
            draining: HashMap::new(),
            drain_handles: Vec::new(),
            next_index: 0,
            commands_tx: commands_tx.clone(),
            members_tx,
        };
        controller.ensure_minimum().await;
        controller.publish();
        info!(
            "Worker管理器已启动: {} 个Worker (范围: {}..={})",
            controller.workers.len(),
            controller.config.min_workers,
            controller.config.max_workers
        );

        let control_handle = tokio::spawn(controller.run(commands_rx));

        Ok(Self {
            commands_tx,
            members_rx,
            control_handle: Mutex::new(Some(control_handle)),
        })
    }

    async fn send(&self, command: PoolCommand) -> EngineResult<()> {
        self.commands_tx
            .send(command)
            .await
            .map_err(|_| EngineError::Internal("Worker池控制循环已退出".to_string()))
    }

    /// 立即执行一轮伸缩检查
    pub async fn evaluate(&self) -> EngineResult<ScalingReport> {
        let (reply, rx) = oneshot::channel();
        self.send(PoolCommand::Evaluate(reply)).await?;
        rx.await
            .map_err(|_| EngineError::Internal("Worker池控制循环未响应".to_string()))
    }

    pub async fn resize(&self, min_workers: usize, max_workers: usize) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(PoolCommand::Resize {
            min_workers,
            max_workers,
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| EngineError::Internal("Worker池控制循环未响应".to_string()))?
    }

    pub fn workers(&self) -> Vec<Arc<WorkerInstance>> {
        self.members_rx.borrow().active.clone()
    }

    /// 已移出活跃集合、仍在排空在途任务的Worker
    pub fn draining(&self) -> Vec<Arc<WorkerInstance>> {
        self.members_rx.borrow().draining.clone()
    }

    pub fn pool_size(&self) -> usize {
        self.members_rx.borrow().active.len()
    }

    /// 每个Worker的状态与指标，以及聚合指标；缩容中的Worker一并列出
    pub async fn worker_status(&self) -> WorkerPoolStatus {
        let members = self.members_rx.borrow().clone();

        let mut reports = Vec::with_capacity(members.active.len() + members.draining.len());
        for worker in members.active.iter().chain(members.draining.iter()) {
            reports.push(worker.status_report().await);
        }

        WorkerPoolStatus::from_reports(reports, members.min_workers, members.max_workers)
    }

    /// 停止所有Worker并结束控制循环
    pub async fn shutdown(&self, graceful: bool) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        if self.send(PoolCommand::Shutdown { graceful, reply }).await.is_ok() {
            let _ = rx.await;
        }

        if let Some(handle) = self.control_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Worker池控制循环异常退出: {}", e);
            }
        }
        Ok(())
    }
}
