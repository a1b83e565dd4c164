use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::{TaskDefinition, TaskPriority};
use crate::{EngineError, EngineResult};

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    /// 本次尝试失败，已按退避策略重新入队
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Retrying,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 等待执行（首次或重试）
    pub fn is_waiting(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retrying)
    }

    /// 合法的状态转换
    ///
    /// ```text
    /// Pending  → Running | Cancelled | Failed
    /// Running  → Completed | Failed | Cancelled
    /// Failed   → Retrying
    /// Retrying → Running | Cancelled | Failed
    /// ```
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Retrying)
                | (Retrying, Running)
                | (Retrying, Cancelled)
                | (Retrying, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务执行记录
///
/// 引擎独占的可变状态记录，只能通过状态转换方法修改。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub task_id: String,
    pub function_name: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub queue: String,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<u64>,
    pub retry_count: u32,
    pub worker_id: Option<String>,
    /// 0-100
    pub progress: u8,
    pub logs: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl TaskResult {
    pub fn pending(definition: &TaskDefinition) -> Self {
        Self {
            task_id: definition.id.clone(),
            function_name: definition.function_name.clone(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            queue: definition.queue.clone(),
            priority: definition.priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_time_ms: None,
            retry_count: definition.retry_count,
            worker_id: None,
            progress: 0,
            logs: Vec::new(),
            metadata: definition.metadata.clone(),
        }
    }

    fn transition(&mut self, next: TaskStatus) -> EngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                id: self.task_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self, worker_id: &str) -> EngineResult<()> {
        self.transition(TaskStatus::Running)?;
        let now = Utc::now();
        self.started_at = Some(now);
        self.completed_at = None;
        self.execution_time_ms = None;
        self.worker_id = Some(worker_id.to_string());
        self.error = None;
        self.append_log(format!("attempt {} started on {}", self.retry_count + 1, worker_id));
        Ok(())
    }

    pub fn mark_completed(&mut self, value: Value) -> EngineResult<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(value);
        self.progress = 100;
        self.finish();
        self.append_log("completed".to_string());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: &EngineError) -> EngineResult<()> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.to_string());
        self.finish();
        self.append_log(format!("attempt {} failed: {}", self.retry_count + 1, error));
        Ok(())
    }

    /// Failed → Retrying，重试次数加一
    pub fn mark_retrying(&mut self, next_attempt_at: DateTime<Utc>) -> EngineResult<()> {
        self.transition(TaskStatus::Retrying)?;
        self.retry_count += 1;
        self.completed_at = None;
        self.progress = 0;
        self.append_log(format!(
            "retry {} scheduled at {}",
            self.retry_count,
            next_attempt_at.to_rfc3339()
        ));
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> EngineResult<()> {
        self.transition(TaskStatus::Cancelled)?;
        self.error = Some(EngineError::Cancelled.to_string());
        self.finish();
        self.append_log("cancelled".to_string());
        Ok(())
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        if let Some(started_at) = self.started_at {
            self.execution_time_ms = Some((now - started_at).num_milliseconds().max(0) as u64);
        }
    }

    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
    }

    pub fn append_log(&mut self, line: String) {
        self.logs.push(format!("[{}] {}", Utc::now().format("%H:%M:%S%.3f"), line));
    }
}
