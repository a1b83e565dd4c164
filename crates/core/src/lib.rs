pub mod config;
pub mod errors;
pub mod models;
pub mod retry;
pub mod traits;

pub use errors::*;
pub use retry::{RetryConfig, RetryPolicy};
