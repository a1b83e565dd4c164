use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 队列统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub total_tasks: usize,
    /// 等待执行（含等待重试）的任务数
    pub pending: usize,
    pub running: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_function: BTreeMap<String, usize>,
    pub average_duration_ms: Option<f64>,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub registered_functions: usize,
    pub backend: String,
    pub backend_depth: usize,
}

impl QueueStats {
    /// 活跃任务数（等待 + 运行）
    pub fn active(&self) -> usize {
        self.pending + self.running
    }
}
