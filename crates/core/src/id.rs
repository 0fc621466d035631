//! Strongly-typed identifiers used across the domain.

use serde::{Deserialize, Serialize};

/// Identifier of a message recipient.
///
/// Opaque and stable for the lifetime of a job. Ordering is lexicographic and
/// is only meaningful to the recipient source that issued the identifiers
/// (it decides what "after the cursor" means).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(String);

impl RecipientId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecipientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for RecipientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecipientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
