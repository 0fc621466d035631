//! Periodic throughput reporting and state flushing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::coordinator::JobCoordinator;
use super::rate_limiter::RateLimiter;

/// One throughput report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputSample {
    pub sent: u64,
    pub sent_delta: u64,
    pub per_second: f64,
    pub pending: usize,
    pub delay: Duration,
}

impl ThroughputSample {
    pub fn compute(
        sent_now: u64,
        sent_last: u64,
        elapsed: Duration,
        pending: usize,
        delay: Duration,
    ) -> Self {
        let sent_delta = sent_now.saturating_sub(sent_last);
        let secs = elapsed.as_secs_f64();
        let per_second = if secs > 0.0 {
            sent_delta as f64 / secs
        } else {
            0.0
        };
        Self {
            sent: sent_now,
            sent_delta,
            per_second,
            pending,
            delay,
        }
    }
}

/// Handle to stop a periodic task.
#[derive(Debug)]
pub struct PeriodicHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl PeriodicHandle {
    /// Signal the task and wait for it to exit.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            error!(error = %err, "periodic task aborted");
        }
    }
}

/// Runs `tick` every `period` until shut down. The first tick fires after one period.
fn spawn_periodic<F>(name: &'static str, period: Duration, mut tick: F) -> PeriodicHandle
where
    F: FnMut() + Send + 'static,
{
    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();

    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = signal.notified() => {
                    debug!(task = name, "periodic task stopping");
                    break;
                }
                _ = interval.tick() => tick(),
            }
        }
    });

    PeriodicHandle { shutdown, join }
}

/// Logs send rate, queue depth and current delay every period.
pub struct ThroughputMonitor {
    coordinator: Arc<JobCoordinator>,
    limiter: Arc<RateLimiter>,
    period: Duration,
    sent_last: u64,
    last_at: Instant,
}

impl ThroughputMonitor {
    pub fn new(coordinator: Arc<JobCoordinator>, limiter: Arc<RateLimiter>, period: Duration) -> Self {
        let sent_last = coordinator.counters().sent;
        Self {
            coordinator,
            limiter,
            period,
            sent_last,
            last_at: Instant::now(),
        }
    }

    /// Measure against the previous sample (or construction) and move the baseline forward.
    pub fn sample(&mut self) -> ThroughputSample {
        let now = Instant::now();
        let sample = ThroughputSample::compute(
            self.coordinator.counters().sent,
            self.sent_last,
            now.duration_since(self.last_at),
            self.coordinator.pending_len(),
            self.limiter.delay(),
        );
        self.sent_last = sample.sent;
        self.last_at = now;
        sample
    }

    pub fn spawn(mut self) -> PeriodicHandle {
        let period = self.period;
        spawn_periodic("throughput-monitor", period, move || {
            let sample = self.sample();
            info!(
                sent = sample.sent,
                sent_delta = sample.sent_delta,
                per_second = sample.per_second,
                pending = sample.pending,
                delay_ms = sample.delay.as_millis() as u64,
                "throughput"
            );
        })
    }
}

/// Writes dirty job state every `period`.
pub fn spawn_flusher(coordinator: Arc<JobCoordinator>, period: Duration) -> PeriodicHandle {
    spawn_periodic("state-flusher", period, move || {
        coordinator.flush_if_dirty();
    })
}
