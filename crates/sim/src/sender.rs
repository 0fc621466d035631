//! Seeded message sender.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;

use fanout_core::{
    DispatchError, DispatchResult, MessagePayload, MessageSender, Recipient, RecipientId,
};

use crate::{SimulationConfig, probability, rng_for};

const ATTEMPT_SALT: u64 = 0x100;

/// Sender whose outcome is a pure function of `(seed, recipient, attempt)`.
#[derive(Debug)]
pub struct SimulatedSender {
    seed: u64,
    rate_limit_rate: f64,
    transient_rate: f64,
    retry_after: Option<Duration>,
    attempts: Mutex<HashMap<RecipientId, u32>>,
    sends: AtomicU64,
}

impl SimulatedSender {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            seed: config.seed,
            rate_limit_rate: probability(config.rate_limit_rate),
            transient_rate: probability(config.transient_rate),
            retry_after: config.retry_after,
            attempts: Mutex::new(HashMap::new()),
            sends: AtomicU64::new(0),
        }
    }

    /// Total send calls across all recipients.
    pub fn sends(&self) -> u64 {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn attempts(&self, id: &RecipientId) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    fn next_attempt(&self, id: &RecipientId) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let n = attempts.entry(id.clone()).or_insert(0);
        *n += 1;
        *n
    }
}

#[async_trait::async_trait]
impl MessageSender for SimulatedSender {
    async fn send(&self, recipient: &Recipient, _payload: &MessagePayload) -> DispatchResult<()> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let attempt = self.next_attempt(&recipient.id);

        if recipient.unreachable {
            return Err(DispatchError::unreachable("recipient does not accept messages"));
        }

        let mut rng = rng_for(self.seed, &recipient.id, ATTEMPT_SALT + u64::from(attempt));
        if rng.gen_bool(self.rate_limit_rate) {
            return Err(DispatchError::rate_limited(self.retry_after));
        }
        if rng.gen_bool(self.transient_rate) {
            let status = rng.gen_range(500..=504);
            return Err(DispatchError::transient(format!("upstream returned {status}")));
        }
        Ok(())
    }
}
