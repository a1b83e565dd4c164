use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use taskforge_core::config::QueueConfig;
use taskforge_core::models::{QueueStats, TaskDefinition, TaskResult, TaskStatus};
use taskforge_core::traits::{ExecutionBackend, ProgressReporter, TaskHandler};
use taskforge_core::{EngineError, EngineResult, RetryPolicy};

use crate::registry::TaskRegistry;
use crate::store::{TaskEntry, TaskStore};

/// Worker领取任务的结果
#[derive(Debug)]
pub enum Claim {
    /// 任务已转为运行中，附带该次执行的取消信号
    Running {
        definition: TaskDefinition,
        cancel_rx: watch::Receiver<bool>,
    },
    /// 任务已过期，记录已标记为失败
    Expired,
    /// 记录不存在或不处于可领取状态（已取消、重复投递等）
    Skip,
}

/// 一次执行失败后的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// 已重新入队，等待第 `attempt` 次重试
    Retrying {
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// 进入最终失败状态
    Failed,
    /// 记录已不由该Worker持有（已取消或被清理），失败被忽略
    Ignored,
}

/// 任务队列门面
///
/// 所有任务记录的唯一数据源：提交、查询、取消、重试、统计、清理都经过这里，
/// Worker对记录的每次修改（领取、完成、失败）也只能通过这里的方法进行。
pub struct TaskQueue {
    registry: TaskRegistry,
    backend: Arc<dyn ExecutionBackend>,
    store: RwLock<TaskStore>,
    retry_policy: RetryPolicy,
    config: QueueConfig,
}

impl TaskQueue {
    pub fn new(
        registry: TaskRegistry,
        backend: Arc<dyn ExecutionBackend>,
        retry_policy: RetryPolicy,
        config: QueueConfig,
    ) -> Self {
        Self {
            store: RwLock::new(TaskStore::new(config.max_history)),
            registry,
            backend,
            retry_policy,
            config,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    pub async fn register(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.registry.register(name, handler).await;
    }

    pub async fn handler(&self, function_name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.registry.get(function_name).await
    }

    /// 提交任务，立即返回任务ID
    ///
    /// 函数名未注册时返回 `UnregisteredFunction`；后端拒绝入队时撤销已创建的记录并返回错误。
    #[instrument(skip_all, fields(task_id = %definition.id, function = %definition.function_name))]
    pub async fn submit(&self, definition: TaskDefinition) -> EngineResult<String> {
        if !self.registry.contains(&definition.function_name).await {
            warn!("拒绝提交未注册的任务函数: {}", definition.function_name);
            return Err(EngineError::UnregisteredFunction {
                name: definition.function_name,
            });
        }

        let task_id = definition.id.clone();
        {
            let mut store = self.store.write().await;
            if store.contains(&task_id) {
                return Err(EngineError::Internal(format!("任务ID已存在: {task_id}")));
            }
            store.insert_active(TaskEntry {
                result: TaskResult::pending(&definition),
                definition: definition.clone(),
            });
        }

        if let Err(e) = self.backend.enqueue(&definition).await {
            error!("任务 {} 入队失败: {}", task_id, e);
            self.store.write().await.remove_active(&task_id);
            return Err(e);
        }

        metrics::counter!("taskforge_tasks_submitted_total", "function" => definition.function_name.clone())
            .increment(1);
        info!(
            "任务已提交: {} (函数: {}, 队列: {}, 优先级: {})",
            task_id,
            definition.function_name,
            definition.queue,
            definition.priority.as_str()
        );
        Ok(task_id)
    }

    /// 依次在活跃集合、完成历史、失败历史中查找
    pub async fn get_status(&self, task_id: &str) -> Option<TaskResult> {
        self.store
            .read()
            .await
            .find(task_id)
            .map(|entry| entry.result.clone())
    }

    /// 取消等待中或运行中的任务
    ///
    /// 等待中的任务从后端撤回；运行中的任务只发送取消信号，处理函数是否中断取决于其自身。
    /// 终态或不存在的任务返回 false 且不做任何修改。
    #[instrument(skip(self))]
    pub async fn cancel(&self, task_id: &str) -> bool {
        let previous = {
            let mut store = self.store.write().await;
            let Some(entry) = store.active_mut(task_id) else {
                return false;
            };
            let previous = entry.result.status;
            if entry.result.mark_cancelled().is_err() {
                return false;
            }
            if previous == TaskStatus::Running {
                store.signal_cancel(task_id);
            }
            store.archive(task_id);
            previous
        };

        if previous != TaskStatus::Running {
            match self.backend.remove(task_id).await {
                Ok(true) => debug!("已从后端撤回任务 {}", task_id),
                Ok(false) => debug!("任务 {} 不在后端等待队列中", task_id),
                Err(e) => warn!("从后端撤回任务 {} 失败: {}", task_id, e),
            }
        }

        metrics::counter!("taskforge_tasks_cancelled_total").increment(1);
        info!("任务已取消: {} (原状态: {})", task_id, previous);
        true
    }

    /// 对失败任务发起手动重试，成功时返回新任务ID
    ///
    /// 新任务ID由原ID派生，元数据 `original_task_id` 指向原任务，重试次数为原记录加一；
    /// 原失败记录保持不变。
    #[instrument(skip(self))]
    pub async fn retry_task(&self, task_id: &str) -> EngineResult<Option<String>> {
        let (mut definition, retry_count) = {
            let store = self.store.read().await;
            match store.failed_entry(task_id) {
                Some(entry) if entry.result.status == TaskStatus::Failed => {
                    (entry.definition.clone(), entry.result.retry_count)
                }
                _ => return Ok(None),
            }
        };

        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        definition.id = format!("{}-retry-{}", task_id, &suffix[..8]);
        definition.retry_count = retry_count + 1;
        definition.eta = None;
        definition.created_at = now;
        if definition.is_expired(now) {
            definition.expires_at = None;
        }
        definition
            .metadata
            .insert("original_task_id".to_string(), Value::String(task_id.to_string()));

        let new_id = self.submit(definition).await?;
        info!("失败任务 {} 已重新提交为 {}", task_id, new_id);
        Ok(Some(new_id))
    }

    /// 仅对失败任务有效，返回是否已重新提交
    pub async fn retry(&self, task_id: &str) -> bool {
        match self.retry_task(task_id).await {
            Ok(new_id) => new_id.is_some(),
            Err(e) => {
                warn!("重试任务 {} 失败: {}", task_id, e);
                false
            }
        }
    }

    /// Worker领取已出队的任务定义
    pub async fn claim(&self, definition: TaskDefinition, worker_id: &str) -> Claim {
        let mut store = self.store.write().await;
        let Some(entry) = store.active_mut(&definition.id) else {
            debug!("任务 {} 不在活跃集合中，跳过", definition.id);
            return Claim::Skip;
        };

        if !entry.result.status.is_waiting() {
            debug!(
                "任务 {} 当前状态为 {}，跳过重复投递",
                definition.id, entry.result.status
            );
            return Claim::Skip;
        }

        if definition.is_expired(Utc::now()) {
            if let Err(e) = entry.result.mark_failed(&EngineError::Expired) {
                error!("标记过期任务失败: {}", e);
                return Claim::Skip;
            }
            store.archive(&definition.id);
            metrics::counter!("taskforge_tasks_failed_total", "reason" => "expired").increment(1);
            warn!("任务 {} 已过期，不再执行", definition.id);
            return Claim::Expired;
        }

        if let Err(e) = entry.result.mark_running(worker_id) {
            error!("任务 {} 无法转为运行中: {}", definition.id, e);
            return Claim::Skip;
        }

        let cancel_rx = store.open_cancel_signal(&definition.id);
        debug!("任务 {} 由 {} 领取", definition.id, worker_id);
        Claim::Running {
            definition,
            cancel_rx,
        }
    }

    /// 记录成功结果，返回是否被采纳
    pub async fn complete(&self, task_id: &str, worker_id: &str, value: Value) -> bool {
        let mut store = self.store.write().await;
        let Some(entry) = store.active_mut(task_id) else {
            return false;
        };
        if !Self::held_by(&entry.result, worker_id) {
            return false;
        }

        if let Err(e) = entry.result.mark_completed(value) {
            error!("标记任务完成失败: {}", e);
            return false;
        }

        let function_name = entry.result.function_name.clone();
        if let Some(ms) = entry.result.execution_time_ms {
            metrics::histogram!("taskforge_task_duration_seconds", "function" => function_name.clone())
                .record(ms as f64 / 1000.0);
        }
        store.archive(task_id);

        metrics::counter!("taskforge_tasks_completed_total", "function" => function_name)
            .increment(1);
        debug!("任务 {} 执行完成", task_id);
        true
    }

    /// 记录一次执行失败，按重试策略决定重新入队还是最终失败
    pub async fn fail(&self, task_id: &str, worker_id: &str, error: EngineError) -> FailureOutcome {
        let retry = {
            let mut store = self.store.write().await;
            let Some(entry) = store.active_mut(task_id) else {
                return FailureOutcome::Ignored;
            };
            if !Self::held_by(&entry.result, worker_id) {
                return FailureOutcome::Ignored;
            }

            if let Err(e) = entry.result.mark_failed(&error) {
                error!("标记任务失败出错: {}", e);
                return FailureOutcome::Ignored;
            }
            metrics::counter!("taskforge_tasks_failed_total", "reason" => error_reason(&error))
                .increment(1);

            let retry_count = entry.result.retry_count;
            if error.is_retryable()
                && self
                    .retry_policy
                    .should_retry(retry_count, entry.definition.max_retries)
            {
                let attempt = retry_count + 1;
                let delay = self.retry_policy.delay_for_attempt(
                    StdDuration::from_secs(entry.definition.retry_delay_seconds),
                    attempt,
                );
                let next_attempt_at =
                    Utc::now() + Duration::from_std(delay).unwrap_or_else(|_| Duration::zero());

                if let Err(e) = entry.result.mark_retrying(next_attempt_at) {
                    error!("任务 {} 无法进入重试: {}", task_id, e);
                    store.archive(task_id);
                    return FailureOutcome::Failed;
                }
                entry.definition.retry_count = entry.result.retry_count;
                entry.definition.eta = Some(next_attempt_at);
                Some((entry.definition.clone(), attempt, next_attempt_at))
            } else {
                store.archive(task_id);
                None
            }
        };

        let Some((definition, attempt, next_attempt_at)) = retry else {
            warn!("任务 {} 最终失败: {}", task_id, error);
            return FailureOutcome::Failed;
        };

        if let Err(e) = self.backend.enqueue(&definition).await {
            error!("任务 {} 重新入队失败: {}", task_id, e);
            let mut store = self.store.write().await;
            if let Some(entry) = store.active_mut(task_id) {
                if entry.result.mark_failed(&e).is_ok() {
                    store.archive(task_id);
                }
            }
            return FailureOutcome::Failed;
        }

        metrics::counter!("taskforge_tasks_retried_total").increment(1);
        info!(
            "任务 {} 第{}次执行失败 ({})，将于 {} 重试",
            task_id,
            attempt,
            error,
            next_attempt_at.to_rfc3339()
        );
        FailureOutcome::Retrying {
            attempt,
            next_attempt_at,
        }
    }

    fn held_by(result: &TaskResult, worker_id: &str) -> bool {
        result.status == TaskStatus::Running && result.worker_id.as_deref() == Some(worker_id)
    }

    pub async fn stats(&self) -> QueueStats {
        let mut stats = self.store.read().await.stats();
        stats.registered_functions = self.registry.len().await;
        stats.backend = self.backend.name().to_string();
        stats.backend_depth = match self.backend.depth().await {
            Ok(depth) => depth,
            Err(e) => {
                warn!("读取后端队列深度失败: {}", e);
                0
            }
        };
        stats
    }

    /// 等待执行（含等待重试）的任务数
    pub async fn pending_count(&self) -> usize {
        self.store.read().await.stats().pending
    }

    pub async fn active_count(&self) -> usize {
        self.store.read().await.active_len()
    }

    /// 清除完成时间早于保留窗口的终态记录，活跃记录不受影响
    ///
    /// 保留窗口为负或超出可表示的时间范围时不清除任何记录。
    pub async fn cleanup(&self, retention: Duration) -> usize {
        if retention < Duration::zero() {
            return 0;
        }
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            debug!("保留窗口 {} 超出时间范围，跳过清理", retention);
            return 0;
        };
        let mut store = self.store.write().await;
        let evicted = store.evict_finished_before(cutoff);
        let (completed, failed) = store.history_len();
        if evicted > 0 {
            info!(
                "清理了 {} 条过期任务记录 (剩余完成: {}, 失败: {})",
                evicted, completed, failed
            );
        }
        evicted
    }

    pub async fn cleanup_older_than_days(&self, days: u64) -> usize {
        let retention = i64::try_from(days).ok().and_then(Duration::try_days);
        match retention {
            Some(retention) => self.cleanup(retention).await,
            None => {
                debug!("保留天数 {} 超出时间范围，跳过清理", days);
                0
            }
        }
    }

    /// 启动定期清理循环，按配置的保留天数清除旧记录
    pub fn spawn_cleanup_loop(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        if self.config.cleanup_interval_seconds == 0 {
            return None;
        }

        let queue = Arc::clone(self);
        let period = StdDuration::from_secs(self.config.cleanup_interval_seconds);
        let retention_days = self.config.retention_days;

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        queue.cleanup_older_than_days(retention_days).await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("清理循环收到关闭信号");
                        break;
                    }
                }
            }
        }))
    }
}

fn error_reason(error: &EngineError) -> &'static str {
    match error {
        EngineError::Timeout { .. } => "timeout",
        EngineError::Handler(_) => "handler",
        EngineError::WorkerShutdown => "worker_shutdown",
        EngineError::Expired => "expired",
        EngineError::Cancelled => "cancelled",
        _ => "other",
    }
}

#[async_trait]
impl ProgressReporter for TaskQueue {
    async fn report_progress(&self, task_id: &str, progress: u8) {
        let mut store = self.store.write().await;
        if let Some(entry) = store.active_mut(task_id) {
            if entry.result.status == TaskStatus::Running {
                entry.result.set_progress(progress);
            }
        }
    }

    async fn append_log(&self, task_id: &str, line: String) {
        let mut store = self.store.write().await;
        if let Some(entry) = store.active_mut(task_id) {
            entry.result.append_log(line);
        }
    }
}
