//! Paginates the recipient source into the job's pending queue.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use fanout_core::{DispatchError, RecipientPage, RecipientSource};

use super::coordinator::JobCoordinator;
use crate::config::DispatchConfig;

/// How a producer run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductionOutcome {
    /// The stored job had already paginated the whole source.
    AlreadyComplete,
    /// Reached an empty page.
    Completed { pages: u64, queued: u64 },
    /// A page request kept failing; the job stays resumable from its cursor.
    Halted {
        pages: u64,
        queued: u64,
        error: DispatchError,
    },
    /// The job was deactivated mid-production.
    Stopped { pages: u64, queued: u64 },
}

/// Producer settings.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub page_size: usize,
    pub retry_limit: u32,
    pub retry_backoff: Duration,
}

impl From<&DispatchConfig> for ProducerConfig {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            page_size: config.page_size,
            retry_limit: config.page_retry_limit,
            retry_backoff: config.page_retry_backoff,
        }
    }
}

pub struct Producer<S> {
    coordinator: Arc<JobCoordinator>,
    source: S,
    config: ProducerConfig,
}

impl<S: RecipientSource> Producer<S> {
    pub fn new(coordinator: Arc<JobCoordinator>, source: S, config: ProducerConfig) -> Self {
        Self {
            coordinator,
            source,
            config,
        }
    }

    /// Page through the source from the stored cursor until it is exhausted.
    ///
    /// Every page is checkpointed before the next request, so a crash loses at
    /// most one page of re-pagination. Never restarts a completed job.
    pub async fn run(self) -> ProductionOutcome {
        if self.coordinator.production_complete() {
            debug!("production already complete; not paginating");
            return ProductionOutcome::AlreadyComplete;
        }

        let mut pages = 0u64;
        let mut queued = 0u64;

        loop {
            if !self.coordinator.is_active() {
                info!(pages, queued, "job deactivated; production stopped");
                return ProductionOutcome::Stopped { pages, queued };
            }

            let page = match self.next_page().await {
                Ok(page) => page,
                Err(error) => {
                    error!(pages, queued, error = %error, "page requests exhausted; halting production");
                    self.coordinator.halt_production();
                    return ProductionOutcome::Halted {
                        pages,
                        queued,
                        error,
                    };
                }
            };

            if page.is_empty() {
                self.coordinator.complete_production();
                let _ = self.coordinator.checkpoint();
                info!(pages, queued, "recipient source exhausted");
                return ProductionOutcome::Completed { pages, queued };
            }

            let listed = page.len();
            let cursor = page.last_id().cloned();
            let added = self.coordinator.enqueue_page(page.ids(), cursor);
            let _ = self.coordinator.checkpoint();

            pages += 1;
            queued += added as u64;
            debug!(page = pages, listed, added, "page queued");
        }
    }

    /// Request the page after the current cursor, retrying with linear backoff.
    async fn next_page(&self) -> Result<RecipientPage, DispatchError> {
        let cursor = self.coordinator.cursor();
        let mut attempt = 0u32;

        loop {
            match self
                .source
                .list_page(self.config.page_size, cursor.as_ref())
                .await
            {
                Ok(page) => return Ok(page),
                Err(err) if attempt < self.config.retry_limit => {
                    attempt += 1;
                    let backoff = self.config.retry_backoff.saturating_mul(attempt);
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "page request failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
