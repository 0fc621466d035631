//! Dispatch error model.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::id::RecipientId;

/// Result type used by recipient sources and message senders.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Result type used by job stores.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failure reported by a remote collaborator.
///
/// Every variant is converted into a classification or retry decision by the
/// retry controller; none of them escapes the dispatch engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Recipient lookup failed. Terminal, never retried.
    #[error("recipient not found: {0}")]
    NotFound(RecipientId),

    /// The remote asked us to slow down, optionally with a suggested wait.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Temporary remote failure (network, 5xx, timeout).
    #[error("transient failure: {0}")]
    Transient(String),

    /// The recipient can never be reached (e.g. direct messages closed).
    #[error("recipient permanently unreachable: {0}")]
    PermanentUnreachable(String),
}

impl DispatchError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::PermanentUnreachable(msg.into())
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited { retry_after }
    }

    /// Whether another attempt may change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }
}

/// Persistence failure. Logged by callers; never aborts a run.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}
