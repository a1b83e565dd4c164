use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    backend::BackendConfig,
    engine::{ManagerConfig, QueueConfig},
    observability::ObservabilityConfig,
};
use crate::models::WorkerConfiguration;
use crate::retry::RetryConfig;

/// 环境变量前缀，例如 `TASKFORGE__MANAGER__MAX_WORKERS=16`
pub const ENV_PREFIX: &str = "TASKFORGE";

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/taskforge.toml",
    "taskforge.toml",
    "/etc/taskforge/config.toml",
];

/// 任务引擎完整配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    /// 由管理器创建的Worker所使用的模板配置
    pub worker: WorkerConfiguration,
    pub manager: ManagerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 按以下顺序加载配置，后者覆盖前者：
    ///
    /// 1. 内置默认值
    /// 2. 配置文件（TOML），未指定时依次尝试默认路径
    /// 3. 环境变量（前缀 `TASKFORGE`，层级分隔符 `__`）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("生成默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.backend.validate().context("执行后端配置验证失败")?;
        self.queue.validate().context("队列配置验证失败")?;
        self.retry.validate().context("重试配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.manager.validate().context("Worker管理器配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend.kind, BackendKind::InMemory);
        assert_eq!(config.manager.scale_interval_seconds, 30);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [backend]
            kind = "redis"

            [manager]
            min_workers = 2
            max_workers = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.kind, BackendKind::Redis);
        assert_eq!(config.backend.redis.key_prefix, "taskforge");
        assert_eq!(config.manager.min_workers, 2);
        assert_eq!(config.queue.retention_days, 7);
    }

    #[test]
    fn test_invalid_manager_bounds_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [manager]
            min_workers = 5
            max_workers = 2
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
