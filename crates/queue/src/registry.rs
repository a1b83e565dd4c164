use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use taskforge_core::traits::TaskHandler;

/// 任务函数注册表：函数名 -> 处理函数
///
/// 在进程启动时由宿主应用填充，提交任务时用于校验函数名。
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理函数，同名注册会覆盖旧的处理函数
    pub async fn register(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let name = name.into();
        let mut handlers = self.handlers.write().await;
        if handlers.insert(name.clone(), handler).is_some() {
            warn!("任务函数 {} 已存在，覆盖旧的处理函数", name);
        } else {
            info!("注册任务函数: {}", name);
        }
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.handlers.write().await.remove(name).is_some()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.handlers.read().await.contains_key(name)
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }
}
