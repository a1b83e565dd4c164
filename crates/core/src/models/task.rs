use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 默认任务队列名称
pub const DEFAULT_QUEUE: &str = "default";

/// 任务优先级
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

/// 任务定义
///
/// 提交后不可变的工作单元描述。自动重试时引擎会以新的 `retry_count` 和 `eta`
/// 重新入队同一个定义，但调用方拿到的定义从不被修改。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefinition {
    pub id: String,
    /// 注册表中的任务函数名
    pub function_name: String,
    pub args: Vec<Value>,
    pub kwargs: HashMap<String, Value>,
    pub priority: TaskPriority,
    pub max_retries: u32,
    /// 重试退避基数（秒）
    pub retry_delay_seconds: u64,
    pub timeout_seconds: u64,
    /// 最早执行时间
    pub eta: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub queue: String,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    /// 当前尝试对应的重试次数
    #[serde(default)]
    pub retry_count: u32,
}

impl TaskDefinition {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            function_name: function_name.into(),
            args: Vec::new(),
            kwargs: HashMap::new(),
            priority: TaskPriority::Normal,
            max_retries: 3,
            retry_delay_seconds: 60,
            timeout_seconds: 300,
            eta: None,
            expires_at: None,
            queue: DEFAULT_QUEUE.to_string(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_seconds(mut self, seconds: u64) -> Self {
        self.retry_delay_seconds = seconds;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// ETA已到（或未设置）
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.eta.map_or(true, |eta| eta <= now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// 判断是否匹配Worker订阅的队列和任务类型，空列表表示不过滤
    pub fn matches(&self, queues: &[String], task_types: &[String]) -> bool {
        let queue_ok = queues.is_empty() || queues.iter().any(|q| q == &self.queue);
        let type_ok =
            task_types.is_empty() || task_types.iter().any(|t| t == &self.function_name);
        queue_ok && type_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let def = TaskDefinition::new("generate_design")
            .with_args(vec![json!("villa")])
            .with_kwarg("style", json!("modern"))
            .with_priority(TaskPriority::High)
            .on_queue("ai");

        assert_eq!(def.function_name, "generate_design");
        assert_eq!(def.queue, "ai");
        assert_eq!(def.priority, TaskPriority::High);
        assert_eq!(def.kwargs.get("style"), Some(&json!("modern")));
        assert_eq!(def.retry_count, 0);
        assert!(!def.id.is_empty());
    }

    #[test]
    fn test_due_and_expired() {
        let now = Utc::now();
        let def = TaskDefinition::new("f")
            .with_eta(now + Duration::seconds(30))
            .with_expires_at(now + Duration::seconds(60));

        assert!(!def.is_due(now));
        assert!(def.is_due(now + Duration::seconds(30)));
        assert!(!def.is_expired(now));
        assert!(def.is_expired(now + Duration::seconds(61)));
    }

    #[test]
    fn test_matches_filters() {
        let def = TaskDefinition::new("parse_document").on_queue("documents");

        assert!(def.matches(&[], &[]));
        assert!(def.matches(&["documents".to_string()], &[]));
        assert!(!def.matches(&["ai".to_string()], &[]));
        assert!(def.matches(&[], &["parse_document".to_string()]));
        assert!(!def.matches(&["documents".to_string()], &["send_email".to_string()]));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Urgent > TaskPriority::High);
        assert!(TaskPriority::Low < TaskPriority::Normal);
        assert_eq!(TaskPriority::default(), TaskPriority::Normal);
    }
}
