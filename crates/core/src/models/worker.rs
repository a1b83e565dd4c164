use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker实例配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfiguration {
    pub worker_id: String,
    /// Worker类别标签，例如 "ai" / "documents"
    pub worker_type: String,
    pub max_concurrent_tasks: usize,
    /// 单个任务的最长执行时间上限（秒）
    pub task_timeout_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub poll_interval_ms: u64,
    pub resource_check_interval_seconds: u64,
    pub max_memory_mb: Option<u64>,
    pub max_cpu_percent: Option<f64>,
    pub auto_restart: bool,
    /// 订阅的队列，空表示全部
    pub queues: Vec<String>,
    /// 任务类型过滤（函数名），空表示全部
    pub task_types: Vec<String>,
}

impl Default for WorkerConfiguration {
    fn default() -> Self {
        Self {
            worker_id: "worker".to_string(),
            worker_type: "general".to_string(),
            max_concurrent_tasks: 4,
            task_timeout_seconds: 3600,
            heartbeat_interval_seconds: 30,
            poll_interval_ms: 100,
            resource_check_interval_seconds: 10,
            max_memory_mb: None,
            max_cpu_percent: None,
            auto_restart: true,
            queues: Vec::new(),
            task_types: Vec::new(),
        }
    }
}

impl WorkerConfiguration {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            return Err(anyhow::anyhow!("Worker ID不能为空"));
        }

        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.task_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        if self.resource_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("资源检查间隔必须大于0"));
        }

        if let Some(cpu) = self.max_cpu_percent {
            if cpu <= 0.0 {
                return Err(anyhow::anyhow!("CPU上限必须大于0"));
            }
        }

        if self.max_memory_mb == Some(0) {
            return Err(anyhow::anyhow!("内存上限必须大于0"));
        }

        Ok(())
    }

    /// 基于模板派生出指定ID的配置
    pub fn for_worker(&self, worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..self.clone()
        }
    }
}

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Idle,
    Busy,
    Stopping,
    Stopped,
    Error,
}

impl WorkerState {
    /// 处于可以领取任务的运行态
    pub fn is_active(&self) -> bool {
        matches!(self, WorkerState::Running | WorkerState::Idle | WorkerState::Busy)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Idle => "idle",
            WorkerState::Busy => "busy",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
            WorkerState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Worker指标快照（只读）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerMetrics {
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub total_execution_time_ms: u64,
    pub average_execution_time_ms: f64,
    pub memory_usage_mb: f64,
    pub cpu_usage_percent: f64,
    pub uptime_seconds: u64,
    pub error_rate: f64,
    pub throughput_per_hour: f64,
    pub current_tasks: usize,
    pub peak_concurrent_tasks: usize,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// 单个Worker的状态报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusReport {
    pub worker_id: String,
    pub worker_type: String,
    pub state: WorkerState,
    pub max_concurrent_tasks: usize,
    pub metrics: WorkerMetrics,
}

/// Worker池汇总指标
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregateWorkerMetrics {
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub current_tasks: usize,
    pub capacity: usize,
    pub average_execution_time_ms: f64,
    pub error_rate: f64,
}

/// Worker池状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolStatus {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub workers: Vec<WorkerStatusReport>,
    pub aggregate: AggregateWorkerMetrics,
}

impl WorkerPoolStatus {
    pub fn from_reports(reports: Vec<WorkerStatusReport>, min_workers: usize, max_workers: usize) -> Self {
        let mut aggregate = AggregateWorkerMetrics::default();
        let mut total_time_ms = 0u64;

        for report in &reports {
            aggregate.tasks_processed += report.metrics.tasks_processed;
            aggregate.tasks_failed += report.metrics.tasks_failed;
            aggregate.current_tasks += report.metrics.current_tasks;
            aggregate.capacity += report.max_concurrent_tasks;
            total_time_ms += report.metrics.total_execution_time_ms;
        }

        if aggregate.tasks_processed > 0 {
            aggregate.average_execution_time_ms =
                total_time_ms as f64 / aggregate.tasks_processed as f64;
            aggregate.error_rate = aggregate.tasks_failed as f64 / aggregate.tasks_processed as f64;
        }

        let busy_workers = reports
            .iter()
            .filter(|r| r.state == WorkerState::Busy)
            .count();
        let idle_workers = reports
            .iter()
            .filter(|r| matches!(r.state, WorkerState::Idle | WorkerState::Running))
            .count();

        Self {
            total_workers: reports.len(),
            busy_workers,
            idle_workers,
            min_workers,
            max_workers,
            workers: reports,
            aggregate,
        }
    }
}
