//! Recipients and the payload delivered to them.

use serde::{Deserialize, Serialize};

use crate::id::RecipientId;

/// A message recipient as described by the recipient source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    /// Human-readable handle, used only for logging.
    pub tag: String,
    /// Whether the source already knows this recipient cannot receive messages.
    ///
    /// The engine never reads this directly; it only sees the sender's outcome.
    pub unreachable: bool,
}

impl Recipient {
    pub fn new(id: impl Into<RecipientId>, tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: tag.into(),
            unreachable: false,
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

/// One page of recipients returned by the recipient source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientPage {
    pub items: Vec<Recipient>,
}

impl RecipientPage {
    pub fn new(items: Vec<Recipient>) -> Self {
        Self { items }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Identifier of the last item, which becomes the next cursor.
    pub fn last_id(&self) -> Option<&RecipientId> {
        self.items.last().map(|r| &r.id)
    }

    pub fn ids(&self) -> Vec<RecipientId> {
        self.items.iter().map(|r| r.id.clone()).collect()
    }
}

/// Message content handed unchanged to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub content: String,
}

impl MessagePayload {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}
