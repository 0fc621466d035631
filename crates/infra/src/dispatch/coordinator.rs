//! Owner of the in-memory job state.
//!
//! All mutation of a running job goes through [`JobCoordinator`]: the producer
//! appends pages, workers dequeue and record terminal classifications, and
//! checkpoints serialize the whole state to the job store. Dequeue is a single
//! locked operation, so no two workers can ever receive the same recipient.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use fanout_core::{Classification, Counters, JobSnapshot, RecipientId, StorageError};

use crate::store::JobStore;

/// Result of asking the coordinator for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    /// A recipient now owned by the caller until it records a classification.
    Recipient(RecipientId),
    /// Nothing queued and nothing more will be produced in this run.
    Drained,
    /// The job was deactivated.
    Stopped,
}

#[derive(Debug)]
struct JobState {
    active: bool,
    pending: VecDeque<RecipientId>,
    in_flight: Vec<RecipientId>,
    sent: Vec<RecipientId>,
    failed: Vec<RecipientId>,
    closed: Vec<RecipientId>,
    counters: Counters,
    /// Every identifier ever queued for this job.
    known: HashSet<RecipientId>,
    cursor: Option<RecipientId>,
    production_complete: bool,
    /// Production gave up for this run; not persisted.
    production_halted: bool,
    dirty: bool,
}

impl JobState {
    fn from_snapshot(snapshot: JobSnapshot) -> Self {
        let known = snapshot
            .pending
            .iter()
            .chain(&snapshot.sent)
            .chain(&snapshot.failed)
            .chain(&snapshot.closed)
            .cloned()
            .collect();

        Self {
            active: snapshot.active,
            pending: snapshot.pending.into(),
            in_flight: Vec::new(),
            sent: snapshot.sent,
            failed: snapshot.failed,
            closed: snapshot.closed,
            counters: snapshot.counters,
            known,
            cursor: snapshot.cursor,
            production_complete: snapshot.production_complete,
            production_halted: false,
            dirty: false,
        }
    }

    /// In-flight recipients are written back at the head of `pending`, so a
    /// crash before they resolve re-dispatches them.
    fn to_snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            active: self.active,
            pending: self
                .in_flight
                .iter()
                .chain(self.pending.iter())
                .cloned()
                .collect(),
            sent: self.sent.clone(),
            failed: self.failed.clone(),
            closed: self.closed.clone(),
            counters: self.counters,
            cursor: self.cursor.clone(),
            production_complete: self.production_complete,
            updated_at: Some(Utc::now()),
        }
    }

    fn terminal_mut(&mut self, classification: Classification) -> &mut Vec<RecipientId> {
        match classification {
            Classification::Sent => &mut self.sent,
            Classification::Failed => &mut self.failed,
            Classification::Closed => &mut self.closed,
        }
    }
}

/// Single authority over a job's state and its persistence.
pub struct JobCoordinator {
    store: Arc<dyn JobStore>,
    state: Mutex<JobState>,
    /// Serializes checkpoints so snapshots reach the store in order.
    persist: Mutex<()>,
    changed: Notify,
}

impl std::fmt::Debug for JobCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCoordinator")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl JobCoordinator {
    /// Resume the stored job, or start a new one if none was saved.
    ///
    /// A snapshot that cannot be read is an error: starting over would
    /// re-send every message.
    pub fn open(store: Arc<dyn JobStore>) -> Result<Self, StorageError> {
        let state = match store.load()? {
            Some(mut snapshot) => {
                let report = snapshot.normalize();
                if !report.is_clean() {
                    warn!(
                        duplicates_dropped = report.duplicates_dropped,
                        counters_repaired = report.counters_repaired,
                        "stored snapshot needed repair"
                    );
                }
                info!(
                    active = snapshot.active,
                    pending = snapshot.pending.len(),
                    sent = snapshot.counters.sent,
                    failed = snapshot.counters.failed,
                    closed = snapshot.counters.closed,
                    production_complete = snapshot.production_complete,
                    "resuming dispatch job"
                );
                let mut state = JobState::from_snapshot(snapshot);
                state.dirty = !report.is_clean();
                state
            }
            None => {
                info!("starting new dispatch job");
                let mut state = JobState::from_snapshot(JobSnapshot::new());
                state.dirty = true;
                state
            }
        };

        Ok(Self {
            store,
            state: Mutex::new(state),
            persist: Mutex::new(()),
            changed: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn production_complete(&self) -> bool {
        self.lock().production_complete
    }

    pub fn cursor(&self) -> Option<RecipientId> {
        self.lock().cursor.clone()
    }

    pub fn counters(&self) -> Counters {
        self.lock().counters
    }

    /// Recipients waiting for a worker (excludes in-flight ones).
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Production is complete and every produced recipient is classified.
    pub fn is_finished(&self) -> bool {
        let state = self.lock();
        state.production_complete && state.pending.is_empty() && state.in_flight.is_empty()
    }

    /// Current state in persisted form.
    pub fn snapshot(&self) -> JobSnapshot {
        self.lock().to_snapshot()
    }

    /// Append a produced page and advance the cursor.
    ///
    /// Identifiers the job already knows are skipped. Returns how many were
    /// actually queued.
    pub fn enqueue_page(&self, ids: Vec<RecipientId>, cursor: Option<RecipientId>) -> usize {
        let added = {
            let mut state = self.lock();
            let mut added = 0;
            for id in ids {
                if state.known.insert(id.clone()) {
                    state.pending.push_back(id);
                    added += 1;
                }
            }
            if cursor.is_some() {
                state.cursor = cursor;
            }
            state.dirty = true;
            added
        };
        self.changed.notify_waiters();
        added
    }

    /// The source is exhausted. Never undone.
    pub fn complete_production(&self) {
        {
            let mut state = self.lock();
            state.production_complete = true;
            state.dirty = true;
        }
        self.changed.notify_waiters();
    }

    /// Production failed for this run; workers drain what is queued and exit.
    pub fn halt_production(&self) {
        self.lock().production_halted = true;
        self.changed.notify_waiters();
    }

    /// Stop the job. Workers exit at their next dequeue.
    pub fn deactivate(&self) {
        {
            let mut state = self.lock();
            state.active = false;
            state.dirty = true;
        }
        self.changed.notify_waiters();
    }

    /// Mark a finished job inactive. Returns whether the job is finished.
    pub fn finish_if_done(&self) -> bool {
        let mut state = self.lock();
        let done =
            state.production_complete && state.pending.is_empty() && state.in_flight.is_empty();
        if done && state.active {
            state.active = false;
            state.dirty = true;
        }
        done
    }

    /// Take the next pending recipient, waiting while production may still add more.
    pub async fn dequeue(&self) -> Dequeued {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent notify is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if !state.active {
                    return Dequeued::Stopped;
                }
                if let Some(id) = state.pending.pop_front() {
                    state.in_flight.push(id.clone());
                    return Dequeued::Recipient(id);
                }
                if state.production_complete || state.production_halted {
                    return Dequeued::Drained;
                }
            }

            notified.await;
        }
    }

    /// Record a terminal classification.
    ///
    /// Returns the job's total processed count, or `None` when the recipient
    /// was already classified (the call is then ignored).
    pub fn record_terminal(&self, id: &RecipientId, classification: Classification) -> Option<u64> {
        let mut state = self.lock();

        if let Some(pos) = state.in_flight.iter().position(|x| x == id) {
            state.in_flight.swap_remove(pos);
        } else if let Some(pos) = state.pending.iter().position(|x| x == id) {
            state.pending.remove(pos);
        } else if !state.known.insert(id.clone()) {
            warn!(recipient = %id, classification = %classification, "recipient already classified");
            return None;
        }

        state.terminal_mut(classification).push(id.clone());
        state.counters.increment(classification);
        state.dirty = true;
        Some(state.counters.total())
    }

    /// Write the current state to the store now.
    ///
    /// Failures are logged and returned; the in-memory state stays
    /// authoritative and is retried on the next checkpoint or flush.
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        let _persist = self.persist.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot = {
            let mut state = self.lock();
            state.dirty = false;
            state.to_snapshot()
        };

        match self.store.save(&snapshot) {
            Ok(()) => {
                debug!(
                    pending = snapshot.pending.len(),
                    processed = snapshot.counters.total(),
                    "checkpoint written"
                );
                Ok(())
            }
            Err(err) => {
                self.lock().dirty = true;
                error!(error = %err, "checkpoint failed; continuing with in-memory state");
                Err(err)
            }
        }
    }

    /// Checkpoint only if something changed since the last successful write.
    pub fn flush_if_dirty(&self) -> bool {
        if !self.lock().dirty {
            return false;
        }
        self.checkpoint().is_ok()
    }
}
