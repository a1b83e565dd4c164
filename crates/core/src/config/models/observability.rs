use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// "json" 或 "pretty"
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
    /// 周期性输出队列统计的间隔（秒），0表示关闭
    pub stats_log_interval_seconds: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9090".to_string(),
            stats_log_interval_seconds: 60,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level,
                valid_levels
            ));
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(anyhow::anyhow!("不支持的日志格式: {}", self.log_format));
        }

        if self.metrics_enabled
            && self
                .metrics_bind_address
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(anyhow::anyhow!(
                "无效的指标监听地址: {}",
                self.metrics_bind_address
            ));
        }

        Ok(())
    }
}
