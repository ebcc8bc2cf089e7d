//! Environment-sourced runtime configuration for DynamORM's executor and
//! batch engine: retry policy, deadline buffer, batch concurrency, debug
//! tracing toggle.

pub mod error;
pub mod retry;
pub mod runtime;

pub use error::{ConfigError, Result};
pub use retry::{DeadlinePolicy, RetryPolicy};
pub use runtime::RuntimeConfig;
