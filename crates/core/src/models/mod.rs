//! # 数据模型
//!
//! 任务执行引擎的核心数据结构。
//!
//! ### TaskDefinition - 任务定义
//! 提交后不可变的工作单元：函数名、参数、优先级、重试与超时配置、ETA/过期时间、目标队列。
//!
//! ### TaskResult - 任务执行记录
//! 每个任务定义对应一条记录，由队列门面独占修改，状态流转：
//!
//! ```text
//! Pending → Running → Completed
//!    ↓         ↓
//! Cancelled  Failed → Retrying → Running ...
//! ```
//!
//! ### WorkerConfiguration / WorkerMetrics - Worker配置与指标
//! 指标只由所属Worker写入，管理器只读取快照。

pub mod stats;
pub mod task;
pub mod task_result;
pub mod worker;

pub use stats::*;
pub use task::*;
pub use task_result::*;
pub use worker::*;
