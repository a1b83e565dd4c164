use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 最大重试间隔（秒）
    pub max_interval_seconds: u64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_multiplier: 2.0,
            max_interval_seconds: 3600, // 1小时
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1"));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动系数必须在0到1之间"));
        }

        Ok(())
    }
}

/// 指数退避重试策略
///
/// 任务自动重试与消息代理连接重试共用这一份退避计算：
/// `delay = base × multiplier^(attempt-1)`，并受 `max_interval_seconds` 限制。
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 已重试 `retry_count` 次后是否还能再试
    pub fn should_retry(&self, retry_count: u32, max_retries: u32) -> bool {
        retry_count < max_retries
    }

    /// 第 `attempt` 次重试（从1开始）前的等待时间
    pub fn delay_for_attempt(&self, base: Duration, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw = base.as_secs_f64() * self.config.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.config.max_interval_seconds as f64);

        let jittered = if self.config.jitter_factor > 0.0 && capped > 0.0 {
            let jitter = capped * self.config.jitter_factor;
            let offset = rand::rng().random_range(-jitter..=jitter);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::default();
        let base = Duration::from_secs(10);

        assert_eq!(policy.delay_for_attempt(base, 1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(base, 2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(base, 3), Duration::from_secs(40));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            max_interval_seconds: 60,
            ..Default::default()
        });

        let delay = policy.delay_for_attempt(Duration::from_secs(10), 10);
        assert_eq!(delay, Duration::from_secs(60));
    }

    #[test]
    fn test_zero_base_means_immediate_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(Duration::ZERO, 3), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter_factor: 0.1,
            ..Default::default()
        });

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(Duration::from_secs(100), 1);
            assert!(delay >= Duration::from_secs(90) && delay <= Duration::from_secs(110));
        }
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0, 3));
        assert!(policy.should_retry(2, 3));
        assert!(!policy.should_retry(3, 3));
        assert!(!policy.should_retry(0, 0));
    }
}
