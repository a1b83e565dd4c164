use taskforge_core::config::ManagerConfig;

/// 一次伸缩检查的决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    /// 新增若干Worker
    ScaleUp(usize),
    /// 优雅移除一个Worker
    ScaleDown,
    Hold,
}

/// 伸缩策略
///
/// - 扩容：`pending > pool × scale_up_queue_factor` 且未达上限时，
///   新增 `ceil(pending / tasks_per_new_worker)` 个，不超过 `max_workers`
/// - 缩容：忙碌比例低于 `scale_down_utilization`、队列为空且高于下限时，每轮只移除一个
/// - 池大小超过 `max_workers`（上限被调低）时，无论负载每轮移除一个
#[derive(Debug, Clone)]
pub struct ScalingPolicy {
    min_workers: usize,
    max_workers: usize,
    scale_up_queue_factor: usize,
    tasks_per_new_worker: usize,
    scale_down_utilization: f64,
}

impl ScalingPolicy {
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            scale_up_queue_factor: config.scale_up_queue_factor,
            tasks_per_new_worker: config.tasks_per_new_worker.max(1),
            scale_down_utilization: config.scale_down_utilization,
        }
    }

    pub fn decide(&self, pool_size: usize, pending: usize, busy_fraction: f64) -> ScalingDecision {
        if pool_size > self.max_workers {
            return ScalingDecision::ScaleDown;
        }

        if pending > pool_size * self.scale_up_queue_factor && pool_size < self.max_workers {
            let wanted = pending.div_ceil(self.tasks_per_new_worker);
            let room = self.max_workers - pool_size;
            return ScalingDecision::ScaleUp(wanted.clamp(1, room));
        }

        if busy_fraction < self.scale_down_utilization
            && pending == 0
            && pool_size > self.min_workers
        {
            return ScalingDecision::ScaleDown;
        }

        ScalingDecision::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(min: usize, max: usize) -> ScalingPolicy {
        ScalingPolicy::from_config(&ManagerConfig {
            min_workers: min,
            max_workers: max,
            ..Default::default()
        })
    }

    #[test]
    fn test_scale_up_adds_ceil_pending_over_five() {
        let policy = policy(1, 20);
        assert_eq!(policy.decide(1, 11, 1.0), ScalingDecision::ScaleUp(3));
        assert_eq!(policy.decide(2, 5, 1.0), ScalingDecision::ScaleUp(1));
    }

    #[test]
    fn test_scale_up_capped_at_max() {
        let policy = policy(1, 4);
        assert_eq!(policy.decide(2, 100, 1.0), ScalingDecision::ScaleUp(2));
        assert_eq!(policy.decide(4, 100, 1.0), ScalingDecision::Hold);
    }

    #[test]
    fn test_no_scale_up_below_queue_factor() {
        let policy = policy(1, 10);
        assert_eq!(policy.decide(3, 6, 1.0), ScalingDecision::Hold);
    }

    #[test]
    fn test_scale_down_one_at_a_time() {
        let policy = policy(1, 10);
        assert_eq!(policy.decide(5, 0, 0.0), ScalingDecision::ScaleDown);
        assert_eq!(policy.decide(5, 0, 0.2), ScalingDecision::ScaleDown);
    }

    #[test]
    fn test_scale_down_respects_minimum_and_load() {
        let policy = policy(2, 10);
        assert_eq!(policy.decide(2, 0, 0.0), ScalingDecision::Hold);
        assert_eq!(policy.decide(4, 1, 0.0), ScalingDecision::Hold);
        assert_eq!(policy.decide(4, 0, 0.5), ScalingDecision::Hold);
    }

    #[test]
    fn test_pool_above_max_shrinks_even_when_busy() {
        let policy = policy(1, 2);
        assert_eq!(policy.decide(4, 100, 1.0), ScalingDecision::ScaleDown);
        assert_eq!(policy.decide(3, 0, 1.0), ScalingDecision::ScaleDown);
        assert_eq!(policy.decide(2, 0, 1.0), ScalingDecision::Hold);
    }

    #[test]
    fn test_pool_grows_until_max_under_sustained_load() {
        let policy = policy(1, 6);
        let mut pool = 1;
        let mut cycles = 0;

        while let ScalingDecision::ScaleUp(n) = policy.decide(pool, 50, 1.0) {
            let next = pool + n;
            assert!(next > pool);
            pool = next;
            cycles += 1;
        }

        assert_eq!(pool, 6);
        assert!(cycles >= 1);
    }

    #[test]
    fn test_pool_shrinks_to_min_when_idle() {
        let policy = policy(2, 6);
        let mut pool = 6;

        while policy.decide(pool, 0, 0.0) == ScalingDecision::ScaleDown {
            pool -= 1;
        }

        assert_eq!(pool, 2);
    }
}
