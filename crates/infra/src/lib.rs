//! Infrastructure layer: configuration, job persistence and the dispatch engine.

pub mod config;
pub mod dispatch;
pub mod store;

pub use config::{ConfigError, DispatchConfig, RateLimitConfig, RetryConfig};
pub use dispatch::{DispatchReport, JobCoordinator, RunError, run_job, run_job_until};
pub use store::{FileJobStore, InMemoryJobStore, JobStore};
