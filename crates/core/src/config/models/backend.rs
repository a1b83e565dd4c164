use serde::{Deserialize, Serialize};

/// 执行后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    InMemory,
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::InMemory => "in_memory",
            BackendKind::Redis => "redis",
        }
    }
}

/// 进程内后端配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InMemoryBackendConfig {
    /// 队列最大容量（0表示无限制）
    pub max_queue_size: usize,
}

impl Default for InMemoryBackendConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
        }
    }
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
    pub connection_timeout_seconds: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "taskforge".to_string(),
            connection_timeout_seconds: 5,
            max_retry_attempts: 3,
            retry_delay_seconds: 1,
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("Redis URL不能为空"));
        }

        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(anyhow::anyhow!("Redis URL必须以redis://或rediss://开头"));
        }

        if self.key_prefix.is_empty() {
            return Err(anyhow::anyhow!("Redis键前缀不能为空"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Redis连接超时时间必须大于0"));
        }

        if self.max_retry_attempts == 0 {
            return Err(anyhow::anyhow!("Redis最大重试次数必须大于0"));
        }

        Ok(())
    }
}

/// 执行后端配置，启动时一次性选定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub in_memory: InMemoryBackendConfig,
    pub redis: RedisConfig,
}

impl BackendConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.kind {
            BackendKind::InMemory => Ok(()),
            BackendKind::Redis => self.redis.validate(),
        }
    }
}
