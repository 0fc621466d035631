//! Persisted job snapshot and terminal classifications.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::RecipientId;

/// Terminal classification of a recipient. Once assigned, never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Sent,
    Failed,
    Closed,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Sent => "sent",
            Classification::Failed => "failed",
            Classification::Closed => "closed",
        }
    }
}

impl core::fmt::Display for Classification {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-classification totals, mirroring the sizes of the terminal sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub sent: u64,
    pub failed: u64,
    pub closed: u64,
}

impl Counters {
    pub fn total(&self) -> u64 {
        self.sent + self.failed + self.closed
    }

    pub fn increment(&mut self, classification: Classification) {
        match classification {
            Classification::Sent => self.sent += 1,
            Classification::Failed => self.failed += 1,
            Classification::Closed => self.closed += 1,
        }
    }
}

/// Durable record of a dispatch run.
///
/// Field names follow the on-disk format (`productionComplete`, `updatedAt`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub active: bool,
    pub pending: Vec<RecipientId>,
    pub sent: Vec<RecipientId>,
    pub failed: Vec<RecipientId>,
    pub closed: Vec<RecipientId>,
    pub counters: Counters,
    pub cursor: Option<RecipientId>,
    pub production_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// What [`JobSnapshot::normalize`] had to repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    /// Identifiers dropped because they already appeared elsewhere.
    pub duplicates_dropped: usize,
    /// Whether stored counters disagreed with the terminal sets.
    pub counters_repaired: bool,
}

impl NormalizeReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates_dropped == 0 && !self.counters_repaired
    }
}

impl Default for JobSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl JobSnapshot {
    /// A fresh, active job with nothing produced yet.
    pub fn new() -> Self {
        Self {
            active: true,
            pending: Vec::new(),
            sent: Vec::new(),
            failed: Vec::new(),
            closed: Vec::new(),
            counters: Counters::default(),
            cursor: None,
            production_complete: false,
            updated_at: None,
        }
    }

    /// All recipients produced so far are resolved and nothing else will come.
    pub fn is_finished(&self) -> bool {
        self.production_complete && self.pending.is_empty()
    }

    pub fn terminal(&self, classification: Classification) -> &[RecipientId] {
        match classification {
            Classification::Sent => &self.sent,
            Classification::Failed => &self.failed,
            Classification::Closed => &self.closed,
        }
    }

    /// Restore the "exactly one place per identifier" and counter invariants.
    ///
    /// Terminal classifications win over `pending`; among terminal sets the
    /// first occurrence (sent, failed, closed order) wins.
    pub fn normalize(&mut self) -> NormalizeReport {
        let mut seen: HashSet<RecipientId> = HashSet::new();
        let mut dropped = 0usize;

        for list in [&mut self.sent, &mut self.failed, &mut self.closed, &mut self.pending] {
            let before = list.len();
            list.retain(|id| seen.insert(id.clone()));
            dropped += before - list.len();
        }

        let expected = Counters {
            sent: self.sent.len() as u64,
            failed: self.failed.len() as u64,
            closed: self.closed.len() as u64,
        };
        let counters_repaired = expected != self.counters;
        self.counters = expected;

        NormalizeReport {
            duplicates_dropped: dropped,
            counters_repaired,
        }
    }
}
