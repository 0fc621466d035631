//! Pool of dispatch workers draining the job's pending queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use fanout_core::{Counters, MessagePayload, MessageSender, RecipientId, RecipientSource};

use super::coordinator::{Dequeued, JobCoordinator};
use super::retry::{DispatchOutcome, RetryController};

/// Work done by a single worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub worker: usize,
    pub counters: Counters,
    pub attempts: u64,
}

impl WorkerStats {
    pub fn processed(&self) -> u64 {
        self.counters.total()
    }
}

/// Totals across the pool, one entry per worker that exited cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: Vec<WorkerStats>,
}

impl PoolStats {
    pub fn processed(&self) -> u64 {
        self.workers.iter().map(WorkerStats::processed).sum()
    }

    pub fn attempts(&self) -> u64 {
        self.workers.iter().map(|w| w.attempts).sum()
    }
}

struct WorkerContext {
    coordinator: Arc<JobCoordinator>,
    source: Arc<dyn RecipientSource>,
    sender: Arc<dyn MessageSender>,
    retry: RetryController,
    payload: MessagePayload,
    checkpoint_every: u64,
    worker_yield: Duration,
}

/// Spawns dispatch workers onto the tokio runtime.
pub struct WorkerPool {
    context: WorkerContext,
}

impl WorkerPool {
    pub fn new(
        coordinator: Arc<JobCoordinator>,
        source: Arc<dyn RecipientSource>,
        sender: Arc<dyn MessageSender>,
        retry: RetryController,
        payload: MessagePayload,
    ) -> Self {
        Self {
            context: WorkerContext {
                coordinator,
                source,
                sender,
                retry,
                payload,
                checkpoint_every: 25,
                worker_yield: Duration::from_millis(10),
            },
        }
    }

    pub fn with_checkpoint_every(mut self, every: u64) -> Self {
        self.context.checkpoint_every = every.max(1);
        self
    }

    pub fn with_worker_yield(mut self, pause: Duration) -> Self {
        self.context.worker_yield = pause;
        self
    }

    /// Start `count` workers.
    pub fn spawn(self, count: usize) -> WorkerPoolHandle {
        let context = Arc::new(self.context);
        let joins = (0..count)
            .map(|worker| {
                let context = context.clone();
                tokio::spawn(async move { run_worker(worker, context).await })
            })
            .collect();

        info!(workers = count, "worker pool started");
        WorkerPoolHandle { joins }
    }
}

/// Handle to join a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    joins: Vec<JoinHandle<WorkerStats>>,
}

impl WorkerPoolHandle {
    /// Wait for every worker to exit.
    pub async fn join(self) -> PoolStats {
        let mut stats = PoolStats::default();
        for (worker, join) in self.joins.into_iter().enumerate() {
            match join.await {
                Ok(worker_stats) => stats.workers.push(worker_stats),
                Err(err) => error!(worker, error = %err, "dispatch worker aborted"),
            }
        }
        stats
    }
}

async fn run_worker(worker: usize, ctx: Arc<WorkerContext>) -> WorkerStats {
    let mut stats = WorkerStats {
        worker,
        ..WorkerStats::default()
    };

    loop {
        let id = match ctx.coordinator.dequeue().await {
            Dequeued::Recipient(id) => id,
            Dequeued::Drained => {
                info!(worker, processed = stats.processed(), "queue drained; worker exiting");
                break;
            }
            Dequeued::Stopped => {
                info!(worker, processed = stats.processed(), "job inactive; worker exiting");
                break;
            }
        };

        let outcome = process(worker, &ctx, &id).await;
        stats.counters.increment(outcome.classification);
        stats.attempts += u64::from(outcome.attempts);

        match &outcome.last_error {
            Some(err) => info!(
                worker,
                recipient = %id,
                classification = %outcome.classification,
                attempts = outcome.attempts,
                error = %err,
                "recipient processed"
            ),
            None => info!(
                worker,
                recipient = %id,
                classification = %outcome.classification,
                attempts = outcome.attempts,
                "recipient processed"
            ),
        }

        if let Some(total) = ctx.coordinator.record_terminal(&id, outcome.classification) {
            if total % ctx.checkpoint_every == 0 {
                let _ = ctx.coordinator.checkpoint();
            }
        }

        if ctx.worker_yield.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(ctx.worker_yield).await;
        }
    }

    stats
}

async fn process(worker: usize, ctx: &WorkerContext, id: &RecipientId) -> DispatchOutcome {
    match ctx.source.fetch_one(id).await {
        Ok(recipient) => {
            ctx.retry
                .dispatch(ctx.sender.as_ref(), &recipient, &ctx.payload)
                .await
        }
        Err(err) => {
            warn!(worker, recipient = %id, error = %err, "recipient lookup failed");
            DispatchOutcome::failed_without_attempt(err)
        }
    }
}
