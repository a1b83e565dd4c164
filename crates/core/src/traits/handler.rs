//! 任务处理函数接口
//!
//! 引擎不解释任务负载语义：处理函数接收位置参数与关键字参数，返回任意JSON结果或错误。
//! 异步处理函数用 [`handler_fn`] 包装，CPU密集或阻塞型处理函数用
//! [`blocking_handler_fn`] 包装，后者在阻塞线程池上运行，不会占用Worker的控制循环。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use crate::{models::TaskDefinition, EngineError, EngineResult};

/// 任务处理函数
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, context: TaskContext) -> EngineResult<Value>;
}

/// 任务进度与日志上报
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report_progress(&self, task_id: &str, progress: u8);

    async fn append_log(&self, task_id: &str, line: String);
}

/// 丢弃所有上报，用于脱离引擎直接调用处理函数
pub struct NoopReporter;

#[async_trait]
impl ProgressReporter for NoopReporter {
    async fn report_progress(&self, _task_id: &str, _progress: u8) {}

    async fn append_log(&self, _task_id: &str, _line: String) {}
}

/// 处理函数的执行上下文
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub function_name: String,
    pub args: Vec<Value>,
    pub kwargs: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
    pub retry_count: u32,
    pub worker_id: String,
    reporter: Arc<dyn ProgressReporter>,
    cancel_rx: watch::Receiver<bool>,
}

impl TaskContext {
    pub fn new(
        definition: &TaskDefinition,
        worker_id: impl Into<String>,
        reporter: Arc<dyn ProgressReporter>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            task_id: definition.id.clone(),
            function_name: definition.function_name.clone(),
            args: definition.args.clone(),
            kwargs: definition.kwargs.clone(),
            metadata: definition.metadata.clone(),
            retry_count: definition.retry_count,
            worker_id: worker_id.into(),
            reporter,
            cancel_rx,
        }
    }

    /// 不接入引擎的上下文，取消信号永远不会触发
    pub fn detached(definition: &TaskDefinition) -> Self {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        Self::new(definition, "detached", Arc::new(NoopReporter), cancel_rx)
    }

    /// 反序列化第 `index` 个位置参数
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> EngineResult<T> {
        let value = self.args.get(index).cloned().ok_or_else(|| {
            EngineError::handler(format!("缺少位置参数 #{index} ({})", self.function_name))
        })?;
        Ok(serde_json::from_value(value)?)
    }

    /// 反序列化关键字参数，不存在时返回 None
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> EngineResult<Option<T>> {
        match self.kwargs.get(name) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub async fn set_progress(&self, progress: u8) {
        self.reporter
            .report_progress(&self.task_id, progress.min(100))
            .await;
    }

    pub async fn log(&self, line: impl Into<String>) {
        self.reporter.append_log(&self.task_id, line.into()).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// 等待取消信号
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        let signalled = rx.wait_for(|cancelled| *cancelled).await.map(|_| ());
        if signalled.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = EngineResult<Value>> + Send + 'static,
{
    async fn handle(&self, context: TaskContext) -> EngineResult<Value> {
        (self.f)(context).await
    }
}

struct BlockingHandler<F> {
    f: Arc<F>,
}

#[async_trait]
impl<F> TaskHandler for BlockingHandler<F>
where
    F: Fn(TaskContext) -> EngineResult<Value> + Send + Sync + 'static,
{
    async fn handle(&self, context: TaskContext) -> EngineResult<Value> {
        let f = Arc::clone(&self.f);
        tokio::task::spawn_blocking(move || f(context))
            .await
            .map_err(|e| EngineError::handler(format!("阻塞任务线程异常退出: {e}")))?
    }
}

/// 把异步闭包包装成处理函数
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EngineResult<Value>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// 把阻塞闭包包装成处理函数，执行时运行在阻塞线程池上
pub fn blocking_handler_fn<F>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> EngineResult<Value> + Send + Sync + 'static,
{
    Arc::new(BlockingHandler { f: Arc::new(f) })
}
