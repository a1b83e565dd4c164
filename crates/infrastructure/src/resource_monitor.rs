use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

use taskforge_core::traits::{ResourceProbe, ResourceSample};

/// 基于sysinfo的进程资源采样器
///
/// 采样的是整个进程的常驻内存和CPU占用，同一进程内的所有Worker共享。
/// CPU占用需要两次刷新之间的差值，首次采样通常为0。
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("无法获取当前进程ID，资源采样将返回0: {}", e);
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&self) -> ResourceSample {
        let Some(pid) = self.pid else {
            return ResourceSample::default();
        };

        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        let sample = system
            .process(pid)
            .map(|process| ResourceSample {
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
                cpu_percent: process.cpu_usage() as f64,
            })
            .unwrap_or_default();

        debug!(
            "资源采样: 内存 {:.1}MB, CPU {:.1}%",
            sample.memory_mb, sample.cpu_percent
        );
        sample
    }
}
