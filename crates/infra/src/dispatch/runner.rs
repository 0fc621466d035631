//! Runs one dispatch job end to end.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};

use fanout_core::{
    Counters, DispatchError, MessagePayload, MessageSender, RecipientSource, StorageError,
};

use super::coordinator::JobCoordinator;
use super::monitor::{ThroughputMonitor, spawn_flusher};
use super::producer::{ProducerConfig, Producer, ProductionOutcome};
use super::rate_limiter::RateLimiter;
use super::retry::RetryController;
use super::worker_pool::{PoolStats, WorkerPool};
use crate::config::{ConfigError, DispatchConfig};
use crate::store::JobStore;

/// Why a run could not start.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid dispatch configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Summary of a run.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub counters: Counters,
    /// Recipients still queued (non-zero when the run stopped early).
    pub pending: usize,
    pub production_complete: bool,
    /// False once the job finished or was deactivated.
    pub active: bool,
    /// Production is complete and nothing is left to send.
    pub finished: bool,
    pub production: ProductionOutcome,
    pub workers: PoolStats,
    pub final_delay: Duration,
    pub elapsed: Duration,
}

/// Resume (or start) the stored job and run it until the queue is drained.
///
/// Returns an error only when the configuration is invalid or the stored
/// snapshot cannot be loaded; every remote or persistence failure after that
/// is handled inside the run.
pub async fn run_job(
    config: &DispatchConfig,
    store: Arc<dyn JobStore>,
    source: Arc<dyn RecipientSource>,
    sender: Arc<dyn MessageSender>,
    payload: MessagePayload,
) -> Result<DispatchReport, RunError> {
    run_job_until(config, store, source, sender, payload, std::future::pending()).await
}

/// Like [`run_job`], but deactivates the job once `shutdown` resolves.
///
/// Workers finish the recipient they hold and exit; whatever is still queued
/// stays in the saved snapshot with `active = false`.
pub async fn run_job_until<S>(
    config: &DispatchConfig,
    store: Arc<dyn JobStore>,
    source: Arc<dyn RecipientSource>,
    sender: Arc<dyn MessageSender>,
    payload: MessagePayload,
    shutdown: S,
) -> Result<DispatchReport, RunError>
where
    S: Future<Output = ()> + Send + 'static,
{
    config.validate()?;

    let started = Instant::now();
    let coordinator = Arc::new(JobCoordinator::open(store)?);
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
    let retry = RetryController::new(limiter.clone(), config.retry.clone());

    let monitor =
        ThroughputMonitor::new(coordinator.clone(), limiter.clone(), config.monitor_period).spawn();
    let flusher = spawn_flusher(coordinator.clone(), config.save_interval);

    let producer = tokio::spawn(
        Producer::new(coordinator.clone(), source.clone(), ProducerConfig::from(config)).run(),
    );

    let pool = WorkerPool::new(coordinator.clone(), source, sender, retry, payload)
        .with_checkpoint_every(config.checkpoint_every)
        .with_worker_yield(config.worker_yield)
        .spawn(config.worker_count);

    let canceller = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            shutdown.await;
            info!("shutdown requested, deactivating job");
            coordinator.deactivate();
        })
    };

    let production = match producer.await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "producer task aborted");
            coordinator.halt_production();
            ProductionOutcome::Halted {
                pages: 0,
                queued: 0,
                error: DispatchError::transient(format!("producer task aborted: {err}")),
            }
        }
    };

    let workers = pool.join().await;
    canceller.abort();

    monitor.shutdown().await;
    flusher.shutdown().await;

    let finished = coordinator.finish_if_done();
    let _ = coordinator.checkpoint();

    let report = DispatchReport {
        counters: coordinator.counters(),
        pending: coordinator.pending_len(),
        production_complete: coordinator.production_complete(),
        active: coordinator.is_active(),
        finished,
        production,
        workers,
        final_delay: limiter.delay(),
        elapsed: started.elapsed(),
    };

    info!(
        sent = report.counters.sent,
        failed = report.counters.failed,
        closed = report.counters.closed,
        pending = report.pending,
        production_complete = report.production_complete,
        active = report.active,
        finished = report.finished,
        attempts = report.workers.attempts(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "dispatch run finished"
    );

    Ok(report)
}
