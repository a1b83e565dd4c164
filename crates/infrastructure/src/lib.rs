pub mod backend_factory;
pub mod in_memory_backend;
#[cfg(feature = "redis-backend")]
pub mod redis_backend;
pub mod resource_monitor;

pub use backend_factory::{BackendFactory, BackendSelection};
pub use in_memory_backend::InMemoryBackend;
#[cfg(feature = "redis-backend")]
pub use redis_backend::RedisBackend;
pub use resource_monitor::SysinfoProbe;
