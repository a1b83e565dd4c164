pub mod heartbeat;
pub mod resource_guard;
pub mod task_execution;

pub use heartbeat::HeartbeatManager;
pub use resource_guard::ResourceGuard;
pub use task_execution::TaskExecutionManager;
