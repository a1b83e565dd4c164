use serde::{Deserialize, Serialize};

/// 队列门面配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// 已完成/失败历史各自保留的最大条数
    pub max_history: usize,
    /// 终态记录保留天数
    pub retention_days: u64,
    /// 定期清理间隔（秒），0表示不启动清理循环
    pub cleanup_interval_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_history: 10000,
            retention_days: 7,
            cleanup_interval_seconds: 3600,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_history == 0 {
            return Err(anyhow::anyhow!("历史记录容量必须大于0"));
        }

        if self.retention_days == 0 {
            return Err(anyhow::anyhow!("记录保留天数必须大于0"));
        }

        Ok(())
    }
}

/// Worker管理器（自动伸缩）配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// 伸缩检查间隔（秒）
    pub scale_interval_seconds: u64,
    /// 等待任务数超过 池大小×该系数 时扩容
    pub scale_up_queue_factor: usize,
    /// 每多少个等待任务新增一个Worker
    pub tasks_per_new_worker: usize,
    /// 忙碌比例低于该值且队列为空时缩容
    pub scale_down_utilization: f64,
    /// 缩容/关闭时等待在途任务完成的时间（秒）
    pub drain_timeout_seconds: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 8,
            scale_interval_seconds: 30,
            scale_up_queue_factor: 2,
            tasks_per_new_worker: 5,
            scale_down_utilization: 0.3,
            drain_timeout_seconds: 300,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_workers == 0 {
            return Err(anyhow::anyhow!("最大Worker数必须大于0"));
        }

        if self.min_workers > self.max_workers {
            return Err(anyhow::anyhow!(
                "最小Worker数({})不能大于最大Worker数({})",
                self.min_workers,
                self.max_workers
            ));
        }

        if self.scale_interval_seconds == 0 {
            return Err(anyhow::anyhow!("伸缩检查间隔必须大于0"));
        }

        if self.tasks_per_new_worker == 0 {
            return Err(anyhow::anyhow!("每个新Worker对应的任务数必须大于0"));
        }

        if !(0.0..=1.0).contains(&self.scale_down_utilization) {
            return Err(anyhow::anyhow!("缩容利用率阈值必须在0到1之间"));
        }

        Ok(())
    }
}
