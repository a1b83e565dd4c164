//! TaskForge 后台任务执行引擎
//!
//! [`TaskEngine`] 组装执行后端、任务注册表、队列门面和Worker池，是调用方唯一需要持有的对象。

pub mod builtin;
pub mod engine;
pub mod logging;
pub mod shutdown;

pub use engine::{TaskEngine, TaskEngineBuilder};
pub use taskforge_core::config::AppConfig;
pub use taskforge_core::models::{TaskDefinition, TaskPriority, TaskResult, TaskStatus};
pub use taskforge_core::traits::{blocking_handler_fn, handler_fn, TaskContext, TaskHandler};
pub use taskforge_core::{EngineError, EngineResult};
