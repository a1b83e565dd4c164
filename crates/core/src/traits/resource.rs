use serde::{Deserialize, Serialize};

/// 一次资源采样结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub memory_mb: f64,
    pub cpu_percent: f64,
}

impl ResourceSample {
    /// 返回超出的上限描述，未超限时为 None
    pub fn breach(&self, max_memory_mb: Option<u64>, max_cpu_percent: Option<f64>) -> Option<String> {
        if let Some(limit) = max_memory_mb {
            if self.memory_mb > limit as f64 {
                return Some(format!("内存 {:.1}MB 超过上限 {}MB", self.memory_mb, limit));
            }
        }
        if let Some(limit) = max_cpu_percent {
            if self.cpu_percent > limit {
                return Some(format!("CPU {:.1}% 超过上限 {:.1}%", self.cpu_percent, limit));
            }
        }
        None
    }
}

/// 进程资源采样接口
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceSample;
}
