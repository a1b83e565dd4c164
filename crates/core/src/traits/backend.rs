use async_trait::async_trait;

use crate::{models::TaskDefinition, EngineResult};

/// 执行后端抽象接口
///
/// 队列门面通过它投递任务，Worker通过它领取任务。进程内实现与外部消息代理实现
/// 遵循同一契约，上层对具体后端无感知。
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// 后端名称，用于日志和统计
    fn name(&self) -> &'static str;

    /// 投递任务定义；ETA未到的任务在到期前不会被领取
    async fn enqueue(&self, definition: &TaskDefinition) -> EngineResult<()>;

    /// 非阻塞地领取一个匹配的任务
    ///
    /// `queues` / `task_types` 为空表示不过滤。同一个定义只会被一个调用方领取。
    async fn dequeue(
        &self,
        queues: &[String],
        task_types: &[String],
    ) -> EngineResult<Option<TaskDefinition>>;

    /// 确认任务处理完成
    async fn ack(&self, task_id: &str) -> EngineResult<()>;

    /// 报告本次处理失败；是否重新入队由队列门面的重试策略决定
    async fn nack(&self, task_id: &str, error: &str) -> EngineResult<()>;

    /// 撤回尚未被领取的任务，返回是否找到
    async fn remove(&self, task_id: &str) -> EngineResult<bool>;

    /// 尚未被领取的任务数量（含延迟任务）
    async fn depth(&self) -> EngineResult<usize>;
}
