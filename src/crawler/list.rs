//! Id discovery by pagination
//!
//! Each final partition is paged sequentially from page 1 until a short or
//! empty page, or until the page bound. Partitions are discovered
//! concurrently and merged into one deduplicated id list.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::crawler::client::SharedListingApi;
use crate::crawler::gated_search;
use crate::crawler::planner::{PartitionPlan, PlannedPartition};
use crate::crawler::rate_limit::RequestGate;
use crate::metrics::{IngestEvent, SharedReporter};
use crate::models::{EntityId, Partition, SearchQuery};
use crate::utils::error::FetchError;
use crate::utils::retry::RetryConfig;

/// Ids collected from one final partition
#[derive(Debug, Clone)]
pub struct DiscoveredPartition {
    pub partition: Partition,
    pub reported_total: u64,
    /// Unique ids in first-seen order
    pub ids: Vec<EntityId>,
    pub pages: u32,
    /// Id count matches the reported total
    pub complete: bool,
    /// Set when a page failed after retries; `ids` holds what came before
    pub error: Option<String>,
}

/// Merged result of discovering all partitions
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    /// Globally unique ids, in partition order
    pub ids: Vec<EntityId>,
    pub partitions: Vec<DiscoveredPartition>,
    /// Ids already seen in an earlier partition
    pub duplicates: u64,
}

impl DiscoveryResult {
    pub fn incomplete_count(&self) -> usize {
        self.partitions.iter().filter(|p| !p.complete).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &DiscoveredPartition> {
        self.partitions.iter().filter(|p| p.error.is_some())
    }
}

/// Paginates final partitions to collect entity ids
pub struct IdDiscovery {
    api: SharedListingApi,
    gate: Arc<RequestGate>,
    retry: RetryConfig,
    per_page: u32,
    max_pages: u32,
    concurrency: usize,
    reporter: SharedReporter,
}

impl IdDiscovery {
    pub fn new(
        api: SharedListingApi,
        gate: Arc<RequestGate>,
        retry: RetryConfig,
        reporter: SharedReporter,
    ) -> Self {
        Self {
            api,
            gate,
            retry,
            per_page: 50,
            max_pages: 200,
            concurrency: 4,
            reporter,
        }
    }

    #[must_use]
    pub fn with_paging(mut self, per_page: u32, max_pages: u32) -> Self {
        self.per_page = per_page.max(1);
        self.max_pages = max_pages.max(1);
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Discover every final partition of a plan and merge the ids
    pub async fn discover_all(
        &self,
        plan: &PartitionPlan,
        cancel: &CancellationToken,
    ) -> DiscoveryResult {
        let partitions: Vec<DiscoveredPartition> = stream::iter(&plan.finals)
            .map(|planned| self.discover_partition(planned, cancel))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut duplicates = 0u64;

        for discovered in &partitions {
            for id in &discovered.ids {
                if seen.insert(id.clone()) {
                    ids.push(id.clone());
                } else {
                    duplicates += 1;
                }
            }
        }

        if duplicates > 0 {
            tracing::warn!(duplicates, "Ids found in more than one partition");
        }

        DiscoveryResult {
            ids,
            partitions,
            duplicates,
        }
    }

    /// Page through one partition
    pub async fn discover_partition(
        &self,
        planned: &PlannedPartition,
        cancel: &CancellationToken,
    ) -> DiscoveredPartition {
        let partition = &planned.partition;
        let mut reported_total = planned.total_hits;
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut error = None;
        let mut pages = 0;

        for page in 1..=self.max_pages {
            if cancel.is_cancelled() {
                error = Some("cancelled".to_string());
                break;
            }

            let query = SearchQuery::new(partition.clone(), page, self.per_page);
            match gated_search(self.api.as_ref(), &self.gate, &self.retry, &query).await {
                Ok((result, _)) => {
                    pages = page;
                    if page == 1 {
                        reported_total = result.total_hits;
                    }
                    for hit in result.hits {
                        if seen.insert(hit.id.clone()) {
                            ids.push(hit.id);
                        }
                    }

                    if result.result_count < self.per_page as usize {
                        break;
                    }
                    if page == self.max_pages {
                        tracing::warn!(
                            partition = %partition,
                            pages = page,
                            "Page bound reached, results may be undercounted"
                        );
                    }
                }
                Err(e) if page > 1 && matches!(e.error, FetchError::ClientError(400)) => {
                    tracing::warn!(
                        partition = %partition,
                        page,
                        "Page rejected past the first page, treating as end of results"
                    );
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        partition = %partition,
                        page,
                        collected = ids.len(),
                        error = %e,
                        "Discovery page failed"
                    );
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        let complete = error.is_none() && ids.len() as u64 == reported_total;
        self.reporter.report(IngestEvent::PartitionDiscovered {
            partition,
            reported_total,
            discovered: ids.len(),
            complete,
        });
        if let Some(error) = &error {
            self.reporter.report(IngestEvent::PartitionFailed { partition, error });
        }

        DiscoveredPartition {
            partition: partition.clone(),
            reported_total,
            ids,
            pages,
            complete,
            error,
        }
    }
}
