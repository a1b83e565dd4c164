use std::sync::Arc;
use tracing::{info, warn};

use taskforge_core::config::{BackendConfig, BackendKind};
use taskforge_core::traits::ExecutionBackend;
use taskforge_core::RetryPolicy;

use crate::InMemoryBackend;

/// 实际选中的后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendSelection {
    pub kind: BackendKind,
    /// 配置要求外部代理但回退到了进程内后端
    pub degraded: bool,
}

pub struct BackendFactory;

impl BackendFactory {
    /// 启动时一次性选定执行后端
    ///
    /// 外部代理不可用（未编译Redis支持，或按重试策略多次连接失败）时回退到进程内后端，
    /// 不返回错误。选定之前没有任何任务入队，回退不会丢失任务。
    pub async fn create(
        config: &BackendConfig,
        retry_policy: &RetryPolicy,
    ) -> (Arc<dyn ExecutionBackend>, BackendSelection) {
        match config.kind {
            BackendKind::InMemory => {
                info!("使用进程内执行后端");
                (
                    Self::in_memory(config),
                    BackendSelection {
                        kind: BackendKind::InMemory,
                        degraded: false,
                    },
                )
            }
            BackendKind::Redis => match Self::connect_redis(config, retry_policy).await {
                Ok(backend) => {
                    info!("使用Redis执行后端: {}", config.redis.url);
                    (
                        backend,
                        BackendSelection {
                            kind: BackendKind::Redis,
                            degraded: false,
                        },
                    )
                }
                Err(reason) => {
                    warn!("Redis执行后端不可用，降级为进程内后端: {}", reason);
                    metrics::counter!("taskforge_backend_degraded_total").increment(1);
                    (
                        Self::in_memory(config),
                        BackendSelection {
                            kind: BackendKind::InMemory,
                            degraded: true,
                        },
                    )
                }
            },
        }
    }

    fn in_memory(config: &BackendConfig) -> Arc<dyn ExecutionBackend> {
        Arc::new(InMemoryBackend::new(config.in_memory.clone()))
    }

    #[cfg(feature = "redis-backend")]
    async fn connect_redis(
        config: &BackendConfig,
        retry_policy: &RetryPolicy,
    ) -> Result<Arc<dyn ExecutionBackend>, String> {
        use std::time::Duration;

        use crate::RedisBackend;

        let attempts = config.redis.max_retry_attempts.max(1);
        let base_delay = Duration::from_secs(config.redis.retry_delay_seconds);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match RedisBackend::connect(&config.redis).await {
                Ok(backend) => return Ok(Arc::new(backend)),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        let delay = retry_policy.delay_for_attempt(base_delay, attempt);
                        warn!(
                            "连接Redis失败 (第{}/{}次): {}，{:?}后重试",
                            attempt, attempts, last_error, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(format!("{attempts}次尝试后仍无法连接: {last_error}"))
    }

    #[cfg(not(feature = "redis-backend"))]
    async fn connect_redis(
        _config: &BackendConfig,
        _retry_policy: &RetryPolicy,
    ) -> Result<Arc<dyn ExecutionBackend>, String> {
        Err("未启用redis-backend特性".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_selection() {
        let config = BackendConfig::default();
        let (backend, selection) = BackendFactory::create(&config, &RetryPolicy::default()).await;

        assert_eq!(backend.name(), "in_memory");
        assert_eq!(selection.kind, BackendKind::InMemory);
        assert!(!selection.degraded);
    }

    #[tokio::test]
    async fn test_unreachable_redis_degrades_to_in_memory() {
        let mut config = BackendConfig {
            kind: BackendKind::Redis,
            ..Default::default()
        };
        config.redis.url = "redis://127.0.0.1:1/0".to_string();
        config.redis.max_retry_attempts = 2;
        config.redis.retry_delay_seconds = 0;
        config.redis.connection_timeout_seconds = 1;

        let (backend, selection) = BackendFactory::create(&config, &RetryPolicy::default()).await;

        assert_eq!(backend.name(), "in_memory");
        assert!(selection.degraded);
    }
}
