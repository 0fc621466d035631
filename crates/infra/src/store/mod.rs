//! Job snapshot persistence.
//!
//! A store holds exactly one snapshot: the state of the current dispatch run.
//! Implementations must make `save` crash-consistent: after a crash the
//! store yields either the previous snapshot or the new one, never a mix.

pub mod file;
pub mod in_memory;

pub use file::FileJobStore;
pub use in_memory::InMemoryJobStore;

use fanout_core::{JobSnapshot, StorageResult};

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Load the stored snapshot, or `None` when no run has been persisted yet.
    fn load(&self) -> StorageResult<Option<JobSnapshot>>;

    /// Persist a snapshot, replacing the previous one atomically.
    fn save(&self, snapshot: &JobSnapshot) -> StorageResult<()>;
}

impl<T: JobStore + ?Sized> JobStore for std::sync::Arc<T> {
    fn load(&self) -> StorageResult<Option<JobSnapshot>> {
        (**self).load()
    }

    fn save(&self, snapshot: &JobSnapshot) -> StorageResult<()> {
        (**self).save(snapshot)
    }
}
