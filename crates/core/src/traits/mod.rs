pub mod backend;
pub mod handler;
pub mod resource;

pub use backend::ExecutionBackend;
pub use handler::{
    blocking_handler_fn, handler_fn, NoopReporter, ProgressReporter, TaskContext, TaskHandler,
};
pub use resource::{ResourceProbe, ResourceSample};
