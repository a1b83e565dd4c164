//! Worker实例与Worker池
//!
//! [`WorkerInstance`] 从队列门面领取任务并在有界并发下执行，
//! [`WorkerManager`] 维护一组Worker并根据队列积压与忙碌比例自动伸缩。

pub mod components;
pub mod instance;
pub mod manager;
pub mod metrics;
pub mod scaling;

pub use instance::WorkerInstance;
pub use manager::{PoolMembers, ScalingReport, WorkerManager};
pub use metrics::WorkerMetricsRecorder;
pub use scaling::{ScalingDecision, ScalingPolicy};
