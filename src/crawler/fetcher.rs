//! Concurrent detail fetching
//!
//! [`DetailFetcher`] keeps at most `concurrency` detail requests in flight.
//! Every attempt waits on the shared [`RequestGate`], so the aggregate rate is
//! bounded by the gate regardless of the worker count. Outcomes are yielded in
//! completion order.

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::crawler::client::SharedListingApi;
use crate::crawler::rate_limit::RequestGate;
use crate::models::EntityId;
use crate::utils::error::FetchError;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Result of fetching one entity's detail
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Payload retrieved
    Fetched {
        id: EntityId,
        payload: Value,
        attempts: u32,
    },

    /// Entity no longer exists upstream (404)
    Gone { id: EntityId },

    /// Terminal error, or transient errors past the retry budget
    Failed {
        id: EntityId,
        error: String,
        attempts: u32,
    },
}

impl FetchOutcome {
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Fetched { id, .. } | Self::Gone { id } | Self::Failed { id, .. } => id,
        }
    }
}

/// Bounded-concurrency detail fetcher
pub struct DetailFetcher {
    api: SharedListingApi,
    gate: Arc<RequestGate>,
    retry: RetryConfig,
    concurrency: usize,
}

impl DetailFetcher {
    pub fn new(
        api: SharedListingApi,
        gate: Arc<RequestGate>,
        retry: RetryConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            api,
            gate,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch every id, yielding outcomes as they complete
    ///
    /// Once `cancel` fires no further ids are started; requests already in
    /// flight still complete.
    pub fn fetch_all(
        &self,
        ids: Vec<EntityId>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = FetchOutcome> + '_ {
        stream::iter(ids)
            .take_until(async move { cancel.cancelled().await })
            .map(move |id| self.fetch_one(id))
            .buffer_unordered(self.concurrency)
    }

    /// Fetch one id with bounded retry
    pub async fn fetch_one(&self, id: EntityId) -> FetchOutcome {
        let api = self.api.as_ref();
        let gate = self.gate.as_ref();
        let target = &id;

        let result = with_retry_if(
            &self.retry,
            |_attempt| async move {
                gate.acquire().await;
                api.detail(target).await
            },
            FetchError::is_transient,
        )
        .await;

        match result {
            Ok((payload, attempts)) => FetchOutcome::Fetched {
                id,
                payload,
                attempts,
            },
            Err(e) if matches!(e.error, FetchError::NotFound) => FetchOutcome::Gone { id },
            Err(e) => FetchOutcome::Failed {
                id,
                error: e.to_string(),
                attempts: e.attempts,
            },
        }
    }
}
