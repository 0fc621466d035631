//! Dispatch engine: producer, worker pool, rate limiting and retries around a
//! single job coordinator.

pub mod coordinator;
pub mod monitor;
pub mod producer;
pub mod rate_limiter;
pub mod retry;
pub mod runner;
pub mod worker_pool;

pub use coordinator::{Dequeued, JobCoordinator};
pub use monitor::{PeriodicHandle, ThroughputMonitor, ThroughputSample, spawn_flusher};
pub use producer::{Producer, ProducerConfig, ProductionOutcome};
pub use rate_limiter::{RateLimiter, SendPermit};
pub use retry::{DispatchOutcome, RetryController};
pub use runner::{DispatchReport, RunError, run_job, run_job_until};
pub use worker_pool::{PoolStats, WorkerPool, WorkerPoolHandle, WorkerStats};
