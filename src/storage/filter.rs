//! Existence filtering of discovered ids
//!
//! Splits the deduplicated id list into ids already persisted and ids still to
//! fetch, with one membership query per chunk.

use std::collections::HashSet;

use crate::models::EntityId;
use crate::storage::repository::SharedRecordStore;
use crate::utils::error::StoreError;

/// Result of an existence check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterResult {
    /// Ids not yet in the store, in input order
    pub work_set: Vec<EntityId>,

    /// Ids already in the store
    pub skipped: Vec<EntityId>,

    /// Membership queries issued
    pub queries: usize,
}

/// Chunked existence filter over a [`RecordStore`](crate::storage::RecordStore)
#[derive(Clone)]
pub struct ExistenceFilter {
    store: SharedRecordStore,
    chunk_size: usize,
}

impl ExistenceFilter {
    pub fn new(store: SharedRecordStore, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Partition `ids` into work set and skipped ids
    ///
    /// # Errors
    ///
    /// Any store error; callers treat this as fatal.
    pub fn filter_blocking(&self, ids: &[EntityId]) -> Result<FilterResult, StoreError> {
        let mut existing = HashSet::new();
        let mut queries = 0;

        for chunk in ids.chunks(self.chunk_size) {
            existing.extend(self.store.existing_ids(chunk)?);
            queries += 1;
        }

        let (skipped, work_set): (Vec<EntityId>, Vec<EntityId>) =
            ids.iter().cloned().partition(|id| existing.contains(id));

        tracing::debug!(
            checked = ids.len(),
            existing = skipped.len(),
            queries,
            "Existence filter applied"
        );

        Ok(FilterResult {
            work_set,
            skipped,
            queries,
        })
    }

    /// Run [`filter_blocking`](Self::filter_blocking) on the blocking pool
    pub async fn filter(&self, ids: Vec<EntityId>) -> crate::error::Result<FilterResult> {
        let filter = self.clone();
        let result = tokio::task::spawn_blocking(move || filter.filter_blocking(&ids)).await??;
        Ok(result)
    }
}
