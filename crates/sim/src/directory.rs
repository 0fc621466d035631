//! Recipient directories.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use fanout_core::{
    DispatchError, DispatchResult, Recipient, RecipientId, RecipientPage, RecipientSource,
};

use crate::{SimulationConfig, probability, rng_for};

const UNREACHABLE_SALT: u64 = 0x01;
const MISSING_SALT: u64 = 0x02;

/// Recipients sorted by id, paged by cursor.
fn page_after(
    recipients: &[Recipient],
    page_size: usize,
    after: Option<&RecipientId>,
) -> RecipientPage {
    let start = match after {
        Some(cursor) => recipients.partition_point(|r| &r.id <= cursor),
        None => 0,
    };
    let end = start.saturating_add(page_size).min(recipients.len());
    RecipientPage::new(recipients[start.min(end)..end].to_vec())
}

/// Seeded directory of `config.recipients` synthetic users.
///
/// Identifiers are zero-padded so lexicographic and numeric order agree.
#[derive(Debug)]
pub struct SimulatedDirectory {
    recipients: Vec<Recipient>,
    missing: HashSet<RecipientId>,
    list_calls: AtomicUsize,
}

impl SimulatedDirectory {
    pub fn new(config: &SimulationConfig) -> Self {
        let unreachable_rate = probability(config.unreachable_rate);
        let missing_rate = probability(config.missing_rate);

        let mut recipients = Vec::with_capacity(config.recipients);
        let mut missing = HashSet::new();

        for n in 1..=config.recipients {
            let id = RecipientId::new(format!("{n:018}"));
            let mut recipient = Recipient::new(id.clone(), format!("user{n}"));
            if rng_for(config.seed, &id, UNREACHABLE_SALT).gen_bool(unreachable_rate) {
                recipient = recipient.unreachable();
            }
            if rng_for(config.seed, &id, MISSING_SALT).gen_bool(missing_rate) {
                missing.insert(id);
            }
            recipients.push(recipient);
        }

        Self {
            recipients,
            missing,
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Listed recipients whose lookup will fail.
    pub fn missing(&self) -> &HashSet<RecipientId> {
        &self.missing
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RecipientSource for SimulatedDirectory {
    async fn list_page(
        &self,
        page_size: usize,
        after: Option<&RecipientId>,
    ) -> DispatchResult<RecipientPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(page_after(&self.recipients, page_size, after))
    }

    async fn fetch_one(&self, id: &RecipientId) -> DispatchResult<Recipient> {
        if self.missing.contains(id) {
            return Err(DispatchError::NotFound(id.clone()));
        }
        let pos = self
            .recipients
            .binary_search_by(|r| r.id.cmp(id))
            .map_err(|_| DispatchError::NotFound(id.clone()))?;
        Ok(self.recipients[pos].clone())
    }
}

/// Fixed directory for tests.
///
/// The first `failing_pages` listing calls fail transiently.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    recipients: Vec<Recipient>,
    missing: HashSet<RecipientId>,
    failing_pages: AtomicUsize,
    list_calls: AtomicUsize,
}

impl StaticDirectory {
    pub fn new(mut recipients: Vec<Recipient>) -> Self {
        recipients.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            recipients,
            ..Self::default()
        }
    }

    /// Recipient is listed but lookups report it as not found.
    pub fn missing(mut self, id: impl Into<RecipientId>) -> Self {
        self.missing.insert(id.into());
        self
    }

    /// Fail the next `count` listing calls.
    pub fn failing_pages(self, count: usize) -> Self {
        self.failing_pages.store(count, Ordering::SeqCst);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RecipientSource for StaticDirectory {
    async fn list_page(
        &self,
        page_size: usize,
        after: Option<&RecipientId>,
    ) -> DispatchResult<RecipientPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let fail = self
            .failing_pages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(DispatchError::transient("directory unavailable"));
        }

        Ok(page_after(&self.recipients, page_size, after))
    }

    async fn fetch_one(&self, id: &RecipientId) -> DispatchResult<Recipient> {
        if self.missing.contains(id) {
            return Err(DispatchError::NotFound(id.clone()));
        }
        self.recipients
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_directory_pages_in_order() {
        let dir = SimulatedDirectory::new(&SimulationConfig::reliable(1, 5));

        let first = dir.list_page(2, None).await.unwrap();
        assert_eq!(first.ids(), vec![
            RecipientId::from("000000000000000001"),
            RecipientId::from("000000000000000002"),
        ]);

        let second = dir.list_page(2, first.last_id()).await.unwrap();
        assert_eq!(second.last_id(), Some(&RecipientId::from("000000000000000004")));

        let third = dir.list_page(2, second.last_id()).await.unwrap();
        assert_eq!(third.len(), 1);

        let done = dir.list_page(2, third.last_id()).await.unwrap();
        assert!(done.is_empty());
        assert_eq!(dir.list_calls(), 4);
    }

    #[tokio::test]
    async fn same_seed_builds_same_directory() {
        let config = SimulationConfig {
            unreachable_rate: 0.3,
            missing_rate: 0.2,
            ..SimulationConfig::new(99, 200)
        };
        let a = SimulatedDirectory::new(&config);
        let b = SimulatedDirectory::new(&config);

        assert_eq!(a.recipients(), b.recipients());
        assert_eq!(a.missing(), b.missing());
        assert!(a.recipients().iter().any(|r| r.unreachable));
    }

    #[tokio::test]
    async fn missing_recipient_is_not_found() {
        let config = SimulationConfig {
            missing_rate: 1.0,
            ..SimulationConfig::reliable(3, 2)
        };
        let dir = SimulatedDirectory::new(&config);
        let id = RecipientId::from("000000000000000001");

        assert_eq!(dir.fetch_one(&id).await, Err(DispatchError::NotFound(id.clone())));
    }

    #[tokio::test]
    async fn static_directory_fails_configured_pages() {
        let dir = StaticDirectory::new(vec![Recipient::new("a", "A")]).failing_pages(1);

        assert!(dir.list_page(10, None).await.is_err());
        assert_eq!(dir.list_page(10, None).await.unwrap().len(), 1);
        assert_eq!(dir.list_calls(), 2);
    }
}
