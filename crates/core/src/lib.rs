//! `fanout-core`: dispatch domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! recipient identity, the persisted job snapshot, terminal classifications,
//! the error taxonomy, and the collaborator ports the engine talks through.

pub mod error;
pub mod id;
pub mod job;
pub mod ports;
pub mod recipient;

pub use error::{DispatchError, DispatchResult, StorageError, StorageResult};
pub use id::RecipientId;
pub use job::{Classification, Counters, JobSnapshot, NormalizeReport};
pub use ports::{MessageSender, RecipientSource};
pub use recipient::{MessagePayload, Recipient, RecipientPage};
