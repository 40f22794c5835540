//! Listing API access and ingestion stages
//!
//! - [`rate_limit`]: shared request gate
//! - [`client`]: the [`ListingApi`] seam and its HTTP implementation
//! - [`mock`]: in-memory API for tests
//! - [`planner`]: partition planning under the result ceiling
//! - [`list`]: id discovery by pagination
//! - [`fetcher`]: concurrent detail fetching
//! - [`pipeline`]: orchestration of a full run

pub mod client;
pub mod fetcher;
pub mod list;
pub mod mock;
pub mod pipeline;
pub mod planner;
pub mod rate_limit;

pub use client::{HttpListingApi, ListingApi, SharedListingApi};
pub use fetcher::{DetailFetcher, FetchOutcome};
pub use list::{DiscoveredPartition, DiscoveryResult, IdDiscovery};
pub use mock::MockListingApi;
pub use pipeline::{IngestPipeline, PipelineBuilder, RunOptions, RunStats};
pub use planner::{FailedPartition, PartitionPlan, PartitionPlanner, PlannedPartition};
pub use rate_limit::RequestGate;

use crate::models::{SearchPage, SearchQuery};
use crate::utils::error::FetchError;
use crate::utils::retry::{with_retry_if, RetryConfig, RetryError};

/// Run one search through the gate with bounded retry
///
/// Every attempt, retries included, waits on the gate first.
pub(crate) async fn gated_search(
    api: &dyn ListingApi,
    gate: &RequestGate,
    retry: &RetryConfig,
    query: &SearchQuery,
) -> Result<(SearchPage, u32), RetryError<FetchError>> {
    with_retry_if(
        retry,
        |_attempt| async move {
            gate.acquire().await;
            api.search(query).await
        },
        FetchError::is_transient,
    )
    .await
}
