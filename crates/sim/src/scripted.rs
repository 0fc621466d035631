//! Sender driven by per-recipient scripts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use fanout_core::{
    DispatchError, DispatchResult, MessagePayload, MessageSender, Recipient, RecipientId,
};

#[derive(Debug, Default)]
struct Script {
    queued: VecDeque<DispatchResult<()>>,
    always: Option<DispatchError>,
}

/// Returns scripted results per recipient; unscripted recipients succeed.
///
/// A `sequence` is consumed one result per attempt, after which the
/// recipient falls back to its `always` error, or success.
#[derive(Debug, Default)]
pub struct ScriptedSender {
    scripts: Mutex<HashMap<RecipientId, Script>>,
    attempts: Mutex<HashMap<RecipientId, u32>>,
}

impl ScriptedSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt for `id` fails with `error`.
    pub fn always(mut self, id: impl Into<RecipientId>, error: DispatchError) -> Self {
        self.script(id.into()).always = Some(error);
        self
    }

    /// Attempts for `id` return `results` in order.
    pub fn sequence(
        mut self,
        id: impl Into<RecipientId>,
        results: Vec<DispatchResult<()>>,
    ) -> Self {
        self.script(id.into()).queued.extend(results);
        self
    }

    fn script(&mut self, id: RecipientId) -> &mut Script {
        self.scripts
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
    }

    /// Send attempts made for `id`.
    pub fn attempts(&self, id: &RecipientId) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Send attempts across all recipients.
    pub fn total_attempts(&self) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

#[async_trait::async_trait]
impl MessageSender for ScriptedSender {
    async fn send(&self, recipient: &Recipient, _payload: &MessagePayload) -> DispatchResult<()> {
        *self
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(recipient.id.clone())
            .or_insert(0) += 1;

        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(script) = scripts.get_mut(&recipient.id) else {
            return Ok(());
        };
        if let Some(next) = script.queued.pop_front() {
            return next;
        }
        match &script.always {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
