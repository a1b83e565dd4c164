pub mod app_config;
pub mod backend;
pub mod engine;
pub mod observability;

pub use app_config::{AppConfig, ENV_PREFIX};
pub use backend::{BackendConfig, BackendKind, InMemoryBackendConfig, RedisConfig};
pub use engine::{ManagerConfig, QueueConfig};
pub use observability::ObservabilityConfig;
