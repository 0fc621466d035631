//! In-memory job store for tests/dev.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use fanout_core::{JobSnapshot, StorageError, StorageResult};

use super::JobStore;

/// Keeps the snapshot in memory.
///
/// Saves can be switched to fail, to exercise best-effort durability paths.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    snapshot: RwLock<Option<JobSnapshot>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Start from an existing snapshot, as if a previous run had saved it.
    pub fn with_snapshot(snapshot: JobSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The last successfully saved snapshot.
    pub fn current(&self) -> Option<JobSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl JobStore for InMemoryJobStore {
    fn load(&self) -> StorageResult<Option<JobSnapshot>> {
        Ok(self.current())
    }

    fn save(&self, snapshot: &JobSnapshot) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::io(
                "<memory>",
                std::io::Error::other("simulated storage failure"),
            ));
        }
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::RecipientId;

    #[test]
    fn empty_store_loads_nothing() {
        let store = InMemoryJobStore::new();
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn save_then_load_returns_latest() {
        let store = InMemoryJobStore::new();
        let mut snapshot = JobSnapshot::new();
        store.save(&snapshot).unwrap();

        snapshot.pending.push(RecipientId::from("7"));
        store.save(&snapshot).unwrap();

        assert_eq!(store.load().unwrap(), Some(snapshot));
        assert_eq!(store.save_count(), 2);
    }

    #[test]
    fn failing_store_keeps_previous_snapshot() {
        let store = InMemoryJobStore::with_snapshot(JobSnapshot::new());
        store.set_failing(true);

        let mut changed = JobSnapshot::new();
        changed.production_complete = true;
        assert!(store.save(&changed).is_err());

        assert!(!store.load().unwrap().unwrap().production_complete);
    }
}
