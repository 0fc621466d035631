//! Collaborator ports: the recipient source and the message sender.
//!
//! Concrete transports (HTTP clients, authentication, wire formats) live outside
//! the engine and implement these traits.

use std::sync::Arc;

use crate::error::DispatchResult;
use crate::id::RecipientId;
use crate::recipient::{MessagePayload, Recipient, RecipientPage};

/// Paginated directory of recipients.
#[async_trait::async_trait]
pub trait RecipientSource: Send + Sync {
    /// List up to `page_size` recipients strictly after `after`, in the
    /// source's stable order. An empty page means the directory is exhausted.
    async fn list_page(
        &self,
        page_size: usize,
        after: Option<&RecipientId>,
    ) -> DispatchResult<RecipientPage>;

    /// Look up a single recipient.
    ///
    /// Fails with [`DispatchError::NotFound`](crate::DispatchError::NotFound)
    /// when the identifier is unknown.
    async fn fetch_one(&self, id: &RecipientId) -> DispatchResult<Recipient>;
}

/// Remote API that delivers one message to one recipient.
#[async_trait::async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, recipient: &Recipient, payload: &MessagePayload) -> DispatchResult<()>;
}

#[async_trait::async_trait]
impl<T: RecipientSource + ?Sized> RecipientSource for Arc<T> {
    async fn list_page(
        &self,
        page_size: usize,
        after: Option<&RecipientId>,
    ) -> DispatchResult<RecipientPage> {
        (**self).list_page(page_size, after).await
    }

    async fn fetch_one(&self, id: &RecipientId) -> DispatchResult<Recipient> {
        (**self).fetch_one(id).await
    }
}

#[async_trait::async_trait]
impl<T: MessageSender + ?Sized> MessageSender for Arc<T> {
    async fn send(&self, recipient: &Recipient, payload: &MessagePayload) -> DispatchResult<()> {
        (**self).send(recipient, payload).await
    }
}
