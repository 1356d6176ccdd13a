//! Durable seen set for discovered items.
//!
//! The job checks ids here before doing anything expensive per item, and
//! marks them once their processed record is durable. Entries are never
//! removed.
//!
//! Ordering matters: an item is marked seen only after its record has been
//! persisted. A crash between discovery and persistence leaves the item
//! unseen, so a later cycle simply processes it again. A crash between
//! persistence and marking can cause duplicate downstream effects; that gap
//! is accepted and only logged.

use crate::error::Result;
use crate::model::item::ItemId;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

/// Durable key-presence storage behind a [`DedupCache`].
#[async_trait]
pub trait SeenStore: Send + Sync {
    async fn contains(&self, id: &ItemId) -> Result<bool>;

    /// The subset of `ids` already present.
    async fn contains_many(&self, ids: &[ItemId]) -> Result<HashSet<ItemId>>;

    /// Add `ids`. Ids already present are left as they are.
    async fn insert_many(&self, ids: &[ItemId]) -> Result<()>;
}

/// In-process seen set.
#[derive(Debug, Default)]
pub struct MemorySeenStore {
    seen: Mutex<HashSet<ItemId>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SeenStore for MemorySeenStore {
    async fn contains(&self, id: &ItemId) -> Result<bool> {
        Ok(self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id))
    }

    async fn contains_many(&self, ids: &[ItemId]) -> Result<HashSet<ItemId>> {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ids.iter().filter(|id| seen.contains(*id)).cloned().collect())
    }

    async fn insert_many(&self, ids: &[ItemId]) -> Result<()> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids.iter().cloned());
        Ok(())
    }
}

/// How [`DedupCache::record_processed`] ended after a successful persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkResult {
    /// Persisted and marked seen.
    Marked(usize),
    /// Persisted, but the seen mark did not commit. The items may be
    /// processed again on a later cycle.
    MarkFailed(String),
}

#[derive(Clone)]
pub struct DedupCache {
    store: Arc<dyn SeenStore>,
}

impl DedupCache {
    pub fn new(store: Arc<dyn SeenStore>) -> Self {
        Self { store }
    }

    pub async fn has_seen(&self, id: &ItemId) -> Result<bool> {
        metrics::dedup_operations().add(1, &[KeyValue::new("operation", "check")]);
        self.store.contains(id).await
    }

    /// Mark a batch of ids as seen.
    ///
    /// Callers must have persisted the items first; prefer
    /// [`record_processed`](Self::record_processed), which enforces that.
    pub async fn mark_seen(&self, ids: &[ItemId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.store.insert_many(ids).await?;
        metrics::dedup_operations().add(
            ids.len() as u64,
            &[KeyValue::new("operation", "mark")],
        );
        debug!(count = ids.len(), "items marked seen");
        Ok(())
    }

    /// Ids from `ids` not yet seen, first occurrence order, without repeats.
    pub async fn filter_unseen(&self, ids: &[ItemId]) -> Result<Vec<ItemId>> {
        metrics::dedup_operations().add(1, &[KeyValue::new("operation", "check")]);
        let seen = self.store.contains_many(ids).await?;
        let mut emitted = HashSet::new();
        Ok(ids
            .iter()
            .filter(|id| !seen.contains(*id) && emitted.insert((*id).clone()))
            .cloned()
            .collect())
    }

    /// Persist a batch, then mark it seen.
    ///
    /// `persist` runs first. If it fails nothing is marked and its error is
    /// returned, so the items stay eligible for the next cycle. If it
    /// succeeds but the mark fails, the failure is logged and reported as
    /// [`MarkResult::MarkFailed`] rather than as an error.
    pub async fn record_processed<F, E>(
        &self,
        ids: &[ItemId],
        persist: F,
    ) -> std::result::Result<MarkResult, E>
    where
        F: Future<Output = std::result::Result<(), E>> + Send,
    {
        persist.await?;

        match self.mark_seen(ids).await {
            Ok(()) => Ok(MarkResult::Marked(ids.len())),
            Err(e) => {
                metrics::dedup_operations().add(1, &[KeyValue::new("operation", "mark_failed")]);
                error!(count = ids.len(), error = %e, "persisted items could not be marked seen");
                Ok(MarkResult::MarkFailed(e.to_string()))
            }
        }
    }
}
