use thiserror::Error;

/// 任务引擎错误类型定义
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("任务函数未注册: {name}")]
    UnregisteredFunction { name: String },

    #[error("任务执行超时: {seconds}s")]
    Timeout { seconds: u64 },

    #[error("任务处理函数错误: {0}")]
    Handler(String),

    #[error("Worker资源超限: {0}")]
    ResourceCeilingExceeded(String),

    #[error("执行后端不可用: {0}")]
    BackendUnavailable(String),

    #[error("执行后端错误: {0}")]
    Backend(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("非法状态转换: 任务 {id} 从 {from} 到 {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("队列已满: {queue} (容量 {capacity})")]
    QueueFull { queue: String, capacity: usize },

    #[error("任务已取消")]
    Cancelled,

    #[error("任务已过期")]
    Expired,

    #[error("Worker已停止，任务被中断")]
    WorkerShutdown,

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl EngineError {
    /// 执行失败后是否允许自动重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. }
                | EngineError::Handler(_)
                | EngineError::WorkerShutdown
                | EngineError::Backend(_)
        )
    }

    /// 便于处理函数返回业务错误
    pub fn handler(message: impl Into<String>) -> Self {
        EngineError::Handler(message.into())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type EngineResult<T> = std::result::Result<T, EngineError>;
