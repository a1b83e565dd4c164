use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use taskforge_core::config::AppConfig;
use taskforge_core::models::{QueueStats, TaskDefinition, TaskResult, WorkerPoolStatus};
use taskforge_core::traits::{ResourceProbe, TaskHandler};
use taskforge_core::{EngineError, EngineResult, RetryPolicy};
use taskforge_infrastructure::{BackendFactory, BackendSelection, SysinfoProbe};
use taskforge_queue::{TaskQueue, TaskRegistry};
use taskforge_worker::{ScalingReport, WorkerManager};

use crate::shutdown::ShutdownManager;

/// 引擎构建器
pub struct TaskEngineBuilder {
    config: AppConfig,
    handlers: Vec<(String, Arc<dyn TaskHandler>)>,
    probe: Option<Arc<dyn ResourceProbe>>,
}

impl TaskEngineBuilder {
    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    /// 替换默认的进程资源采样
    pub fn with_resource_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// 按配置组装后端、注册表、队列门面、Worker池与清理循环
    pub async fn build(self) -> EngineResult<TaskEngine> {
        self.config
            .validate()
            .map_err(|e| EngineError::Configuration(format!("{e:#}")))?;

        let retry_policy = RetryPolicy::new(self.config.retry.clone());
        let (backend, selection) = BackendFactory::create(&self.config.backend, &retry_policy).await;
        if selection.degraded {
            warn!("引擎以降级模式运行: 使用进程内后端代替 {}", self.config.backend.kind.as_str());
        }

        let registry = TaskRegistry::new();
        for (name, handler) in self.handlers {
            registry.register(name, handler).await;
        }

        let queue = Arc::new(TaskQueue::new(
            registry,
            backend,
            retry_policy,
            self.config.queue.clone(),
        ));

        let shutdown = ShutdownManager::new();
        let cleanup_handle = queue.spawn_cleanup_loop(shutdown.subscribe().await);

        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SysinfoProbe::new()) as Arc<dyn ResourceProbe>);
        let manager = WorkerManager::start(
            self.config.manager.clone(),
            self.config.worker.clone(),
            Arc::clone(&queue),
            probe,
        )
        .await?;

        info!(
            "任务引擎已启动: 后端 {}，{} 个处理函数，{} 个Worker",
            selection.kind.as_str(),
            queue.registry().len().await,
            manager.pool_size()
        );

        Ok(TaskEngine {
            config: self.config,
            queue,
            manager,
            selection,
            shutdown,
            cleanup_handle: Mutex::new(cleanup_handle),
        })
    }
}

/// 后台任务执行引擎
///
/// 对外的唯一入口：提交、查询、取消、重试、统计、清理以及Worker池状态。
pub struct TaskEngine {
    config: AppConfig,
    queue: Arc<TaskQueue>,
    manager: WorkerManager,
    selection: BackendSelection,
    shutdown: ShutdownManager,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskEngine {
    pub fn builder(config: AppConfig) -> TaskEngineBuilder {
        TaskEngineBuilder {
            config,
            handlers: Vec::new(),
            probe: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn backend_selection(&self) -> BackendSelection {
        self.selection
    }

    pub async fn register(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.queue.register(name, handler).await;
    }

    pub async fn submit(&self, definition: TaskDefinition) -> EngineResult<String> {
        self.queue.submit(definition).await
    }

    pub async fn get_status(&self, task_id: &str) -> Option<TaskResult> {
        self.queue.get_status(task_id).await
    }

    pub async fn cancel(&self, task_id: &str) -> bool {
        self.queue.cancel(task_id).await
    }

    pub async fn retry(&self, task_id: &str) -> bool {
        self.queue.retry(task_id).await
    }

    pub async fn retry_task(&self, task_id: &str) -> EngineResult<Option<String>> {
        self.queue.retry_task(task_id).await
    }

    pub async fn stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// 清理早于 `older_than_days` 天结束的历史记录
    pub async fn cleanup(&self, older_than_days: u64) -> usize {
        self.queue.cleanup_older_than_days(older_than_days).await
    }

    pub async fn worker_status(&self) -> WorkerPoolStatus {
        self.manager.worker_status().await
    }

    pub async fn evaluate_scaling(&self) -> EngineResult<ScalingReport> {
        self.manager.evaluate().await
    }

    pub async fn resize_workers(&self, min_workers: usize, max_workers: usize) -> EngineResult<()> {
        self.manager.resize(min_workers, max_workers).await
    }

    /// 停止Worker池与后台循环；`graceful` 时等待在途任务，最长为配置的排空超时
    pub async fn shutdown(&self, graceful: bool) -> EngineResult<()> {
        if self.shutdown.is_shutdown().await {
            return Ok(());
        }

        info!("关闭任务引擎 (优雅: {})", graceful);
        self.shutdown.shutdown().await;
        self.manager.shutdown(graceful).await?;

        if let Some(handle) = self.cleanup_handle.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("清理循环未能在5秒内退出");
            }
        }

        let stats = self.queue.stats().await;
        info!(
            "任务引擎已关闭: 完成 {}，失败 {}，取消 {}，未执行 {}",
            stats.completed, stats.failed, stats.cancelled, stats.pending
        );
        Ok(())
    }

    /// 订阅引擎关闭信号，用于宿主程序的附属循环
    pub async fn subscribe_shutdown(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown.subscribe().await
    }
}
