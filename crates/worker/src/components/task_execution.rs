use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore, TryAcquireError};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use taskforge_core::models::TaskDefinition;
use taskforge_core::traits::{ProgressReporter, TaskContext};
use taskforge_core::EngineError;
use taskforge_queue::{Claim, FailureOutcome, TaskQueue};

use crate::metrics::WorkerMetricsRecorder;

/// 一次执行的结果
enum Outcome {
    Completed(Value),
    Failed(EngineError),
    Cancelled,
}

struct RunningTask {
    definition: TaskDefinition,
    abort: AbortHandle,
    started: Instant,
}

/// 有界任务执行器
///
/// 信号量大小等于 `max_concurrent_tasks`，每个在途任务持有一个许可；
/// 在途表的移除操作决定由谁上报结果：执行任务自身，或强制停止时的 [`abort_all`](Self::abort_all)。
pub struct TaskExecutionManager {
    worker_id: String,
    queue: Arc<TaskQueue>,
    metrics: Arc<WorkerMetricsRecorder>,
    semaphore: Arc<Semaphore>,
    max_concurrent_tasks: usize,
    task_timeout: Duration,
    running: Arc<RwLock<HashMap<String, RunningTask>>>,
}

impl TaskExecutionManager {
    pub fn new(
        worker_id: String,
        queue: Arc<TaskQueue>,
        metrics: Arc<WorkerMetricsRecorder>,
        max_concurrent_tasks: usize,
        task_timeout: Duration,
    ) -> Self {
        Self {
            worker_id,
            queue,
            metrics,
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks)),
            max_concurrent_tasks,
            task_timeout,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 尝试预留一个执行槽位，已满或已关闭时返回 None
    pub fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    pub async fn current_task_count(&self) -> usize {
        self.running.read().await.len()
    }

    pub async fn running_task_ids(&self) -> Vec<String> {
        self.running.read().await.keys().cloned().collect()
    }

    /// 领取并在独立任务中执行已出队的定义
    pub async fn dispatch(&self, definition: TaskDefinition, permit: OwnedSemaphorePermit) {
        let task_id = definition.id.clone();
        let backend = Arc::clone(self.queue.backend());

        let (definition, cancel_rx) = match self.queue.claim(definition, &self.worker_id).await {
            Claim::Running {
                definition,
                cancel_rx,
            } => (definition, cancel_rx),
            Claim::Expired | Claim::Skip => {
                if let Err(e) = backend.ack(&task_id).await {
                    warn!("确认跳过的任务 {} 失败: {}", task_id, e);
                }
                return;
            }
        };

        let Some(handler) = self.queue.handler(&definition.function_name).await else {
            let error = EngineError::UnregisteredFunction {
                name: definition.function_name.clone(),
            };
            error!("任务 {} 的处理函数不存在: {}", task_id, error);
            if let Err(e) = backend.nack(&task_id, &error.to_string()).await {
                warn!("拒绝任务 {} 失败: {}", task_id, e);
            }
            self.metrics.record_failure(0).await;
            self.queue.fail(&task_id, &self.worker_id, error).await;
            return;
        };

        let timeout = self.effective_timeout(&definition);
        let reporter: Arc<dyn ProgressReporter> = self.queue.clone();
        let context = TaskContext::new(&definition, self.worker_id.clone(), reporter, cancel_rx);

        let queue = Arc::clone(&self.queue);
        let metrics = Arc::clone(&self.metrics);
        let running = Arc::clone(&self.running);
        let worker_id = self.worker_id.clone();

        let mut running_guard = self.running.write().await;
        let join = tokio::spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            let task_id = context.task_id.clone();
            let cancel_context = context.clone();

            let execution = AssertUnwindSafe(handler.handle(context)).catch_unwind();
            let outcome = tokio::select! {
                result = tokio::time::timeout(timeout, execution) => match result {
                    Ok(Ok(Ok(value))) => Outcome::Completed(value),
                    Ok(Ok(Err(e))) => Outcome::Failed(e),
                    Ok(Err(panic)) => {
                        let message = panic_message(panic.as_ref());
                        error!("任务 {} 的处理函数发生panic: {}", task_id, message);
                        Outcome::Failed(EngineError::handler(format!("处理函数panic: {message}")))
                    }
                    Err(_) => Outcome::Failed(EngineError::Timeout { seconds: timeout.as_secs() }),
                },
                _ = cancel_context.cancelled() => Outcome::Cancelled,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            // 已被强制停止接管则不再上报
            let owned = running.write().await.remove(&task_id).is_some();
            if !owned {
                return;
            }
            metrics.set_current_tasks(running.read().await.len()).await;

            match outcome {
                Outcome::Completed(value) => {
                    if let Err(e) = queue.backend().ack(&task_id).await {
                        warn!("确认任务 {} 失败: {}", task_id, e);
                    }
                    metrics.record_success(elapsed_ms).await;
                    queue.complete(&task_id, &worker_id, value).await;
                    debug!("任务 {} 在 {} 上完成，耗时 {}ms", task_id, worker_id, elapsed_ms);
                }
                Outcome::Failed(error) => {
                    if let Err(e) = queue.backend().nack(&task_id, &error.to_string()).await {
                        warn!("拒绝任务 {} 失败: {}", task_id, e);
                    }
                    metrics.record_failure(elapsed_ms).await;
                    let outcome = queue.fail(&task_id, &worker_id, error).await;
                    if outcome == FailureOutcome::Failed {
                        warn!("任务 {} 在 {} 上最终失败", task_id, worker_id);
                    }
                }
                Outcome::Cancelled => {
                    if let Err(e) = queue.backend().ack(&task_id).await {
                        warn!("确认已取消任务 {} 失败: {}", task_id, e);
                    }
                    metrics.record_failure(elapsed_ms).await;
                    info!("任务 {} 已按请求取消", task_id);
                }
            }
        });

        running_guard.insert(
            task_id.clone(),
            RunningTask {
                definition,
                abort: join.abort_handle(),
                started: Instant::now(),
            },
        );
        let current = running_guard.len();
        drop(running_guard);

        self.metrics.set_current_tasks(current).await;
        debug!("任务 {} 开始在 {} 上执行 (超时: {:?})", task_id, self.worker_id, timeout);
    }

    /// 单次执行超时：任务定义的超时，受Worker上限约束
    fn effective_timeout(&self, definition: &TaskDefinition) -> Duration {
        let requested = Duration::from_secs(definition.timeout_seconds);
        if requested.is_zero() {
            self.task_timeout
        } else {
            requested.min(self.task_timeout)
        }
    }

    /// 等待所有在途任务结束，超时返回 false
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let permits = self.max_concurrent_tasks as u32;
        match tokio::time::timeout(timeout, self.semaphore.acquire_many(permits)).await {
            Ok(Ok(permit)) => {
                drop(permit);
                true
            }
            Ok(Err(_)) => self.current_task_count().await == 0,
            Err(_) => false,
        }
    }

    /// 中止所有在途任务，并以 `WorkerShutdown` 上报失败，返回中止的数量
    pub async fn abort_all(&self) -> usize {
        let aborted: Vec<(String, RunningTask)> = self.running.write().await.drain().collect();

        for (task_id, task) in &aborted {
            task.abort.abort();
            warn!(
                "强制中止任务 {} ({}，已运行 {:?})",
                task_id,
                task.definition.function_name,
                task.started.elapsed()
            );

            let error = EngineError::WorkerShutdown;
            if let Err(e) = self.queue.backend().nack(task_id, &error.to_string()).await {
                warn!("拒绝任务 {} 失败: {}", task_id, e);
            }
            self.queue.fail(task_id, &self.worker_id, error).await;
            self.metrics
                .record_failure(task.started.elapsed().as_millis() as u64)
                .await;
        }

        self.metrics.set_current_tasks(0).await;
        aborted.len()
    }

    /// 关闭信号量，之后不再接受新任务
    pub fn close(&self) {
        self.semaphore.close();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知panic".to_string()
    }
}
