//! 任务注册表与队列门面
//!
//! [`TaskQueue`] 是任务记录的唯一数据源，执行后端只负责搬运任务定义。

pub mod queue;
pub mod registry;
mod store;

pub use queue::{Claim, FailureOutcome, TaskQueue};
pub use registry::TaskRegistry;
