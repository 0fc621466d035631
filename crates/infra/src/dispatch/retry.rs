//! Per-recipient attempt loop with outcome-specific policy.
//!
//! | outcome              | action                                             |
//! |----------------------|----------------------------------------------------|
//! | success              | classify `sent`, speed the limiter up              |
//! | rate limited         | slow the limiter down, wait hint or delay, retry   |
//! | permanently closed   | classify `closed`, never retried                   |
//! | transient            | wait `base_backoff * attempt`, retry               |
//! | attempts exhausted   | classify `failed`                                  |

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use fanout_core::{Classification, DispatchError, MessagePayload, MessageSender, Recipient};

use super::rate_limiter::RateLimiter;
use crate::config::RetryConfig;

/// Result of running the attempt loop for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub classification: Classification,
    /// Send attempts made (0 when the recipient never reached the sender).
    pub attempts: u32,
    /// The error behind a `failed` or `closed` classification.
    pub last_error: Option<DispatchError>,
}

impl DispatchOutcome {
    pub fn failed_without_attempt(error: DispatchError) -> Self {
        Self {
            classification: Classification::Failed,
            attempts: 0,
            last_error: Some(error),
        }
    }
}

/// Retry/backoff controller shared by all workers of a job.
#[derive(Debug, Clone)]
pub struct RetryController {
    limiter: Arc<RateLimiter>,
    config: RetryConfig,
}

impl RetryController {
    pub fn new(limiter: Arc<RateLimiter>, config: RetryConfig) -> Self {
        Self { limiter, config }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts()
    }

    /// Linear backoff after a transient failure on `attempt` (1-indexed).
    pub fn transient_backoff(&self, attempt: u32) -> Duration {
        self.config.base_backoff.saturating_mul(attempt)
    }

    /// Attempt delivery until a terminal outcome or the attempt budget runs out.
    ///
    /// Remote errors never escape: each one is turned into a classification or
    /// a retry decision.
    pub async fn dispatch<S>(
        &self,
        sender: &S,
        recipient: &Recipient,
        payload: &MessagePayload,
    ) -> DispatchOutcome
    where
        S: MessageSender + ?Sized,
    {
        let max_attempts = self.max_attempts();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let permit = self.limiter.acquire().await;
            let result = sender.send(recipient, payload).await;
            permit.release();

            let err = match result {
                Ok(()) => {
                    self.limiter.adjust_down();
                    return DispatchOutcome {
                        classification: Classification::Sent,
                        attempts: attempt,
                        last_error: None,
                    };
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                let classification = match err {
                    DispatchError::PermanentUnreachable(_) => Classification::Closed,
                    _ => Classification::Failed,
                };
                debug!(
                    recipient = %recipient.id,
                    attempt,
                    classification = %classification,
                    error = %err,
                    "terminal send outcome"
                );
                return DispatchOutcome {
                    classification,
                    attempts: attempt,
                    last_error: Some(err),
                };
            }

            let wait = match &err {
                DispatchError::RateLimited { retry_after } => {
                    let delay = self.limiter.adjust_up(*retry_after);
                    warn!(
                        recipient = %recipient.id,
                        attempt,
                        retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                        delay_ms = delay.as_millis() as u64,
                        "rate limited"
                    );
                    retry_after.unwrap_or(delay)
                }
                _ => {
                    let backoff = self.transient_backoff(attempt);
                    warn!(
                        recipient = %recipient.id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient send failure"
                    );
                    backoff
                }
            };

            last_error = Some(err);
            if attempt < max_attempts {
                tokio::time::sleep(wait).await;
            }
        }

        DispatchOutcome {
            classification: Classification::Failed,
            attempts: max_attempts,
            last_error,
        }
    }
}
