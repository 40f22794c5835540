//! In-memory listing API
//!
//! [`MockListingApi`] behaves like the remote service closely enough to test
//! the planner, discovery and fetcher without a network: it filters a catalog
//! by query parameters, reports the full total but refuses pages beyond the
//! page bound, serves detail payloads, answers 404 for gone entities and can
//! inject transient failures.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::crawler::client::{lookup_field, ListingApi};
use crate::models::{EntityId, SearchHit, SearchPage, SearchQuery};
use crate::utils::error::FetchError;
use crate::utils::id_from_json;

/// Mock implementation of [`ListingApi`]
pub struct MockListingApi {
    id_field: String,
    /// Query parameter -> hit field it filters on
    param_fields: HashMap<String, String>,
    max_pages: u32,
    catalog: Vec<Value>,
    details: HashMap<EntityId, Value>,
    gone: HashSet<EntityId>,
    detail_failures: Mutex<HashMap<EntityId, u32>>,
    search_failures: Mutex<HashMap<String, u32>>,
    search_calls: AtomicU64,
    detail_calls: Mutex<HashMap<EntityId, u32>>,
}

impl MockListingApi {
    /// Create an empty mock whose hits carry their id in `id_field`
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            param_fields: HashMap::new(),
            max_pages: 200,
            catalog: Vec::new(),
            details: HashMap::new(),
            gone: HashSet::new(),
            detail_failures: Mutex::new(HashMap::new()),
            search_failures: Mutex::new(HashMap::new()),
            search_calls: AtomicU64::new(0),
            detail_calls: Mutex::new(HashMap::new()),
        }
    }

    /// Let `param` filter the catalog on hit field `field`
    #[must_use]
    pub fn map_param(mut self, param: impl Into<String>, field: impl Into<String>) -> Self {
        self.param_fields.insert(param.into(), field.into());
        self
    }

    /// Highest page number served; later pages answer 400
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Add a search hit and optionally its detail payload
    pub fn add_record(&mut self, hit: Value, detail: Option<Value>) {
        if let Some(detail) = detail {
            if let Some(id) = lookup_field(&hit, &self.id_field).and_then(id_from_json) {
                self.details.insert(EntityId::new(id), detail);
            }
        }
        self.catalog.push(hit);
    }

    /// Answer 404 for this entity's detail
    pub fn mark_gone(&mut self, id: impl Into<EntityId>) {
        self.gone.insert(id.into());
    }

    /// Fail the next `times` detail requests for `id` with a 503
    pub fn fail_detail(&self, id: impl Into<EntityId>, times: u32) {
        lock(&self.detail_failures).insert(id.into(), times);
    }

    /// Fail the next `times` searches of a partition (by its display form) with a 503
    pub fn fail_search(&self, partition: impl Into<String>, times: u32) {
        lock(&self.search_failures).insert(partition.into(), times);
    }

    /// Number of search requests served
    pub fn search_calls(&self) -> u64 {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Number of detail requests made for `id`
    pub fn detail_calls_for(&self, id: &str) -> u32 {
        lock(&self.detail_calls).get(id).copied().unwrap_or(0)
    }

    /// Total detail requests made
    pub fn detail_calls(&self) -> u32 {
        lock(&self.detail_calls).values().sum()
    }

    /// Number of catalog entries
    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    fn matches(&self, hit: &Value, query: &SearchQuery) -> bool {
        query.partition.filters().iter().all(|filter| {
            match self.param_fields.get(&filter.param) {
                Some(field) => lookup_field(hit, field)
                    .and_then(id_from_json)
                    .is_some_and(|v| v == filter.value),
                None => true,
            }
        })
    }

    fn to_hit(&self, value: &Value) -> Option<SearchHit> {
        let id = lookup_field(value, &self.id_field).and_then(id_from_json)?;
        let fields = self
            .param_fields
            .values()
            .filter_map(|field| {
                lookup_field(value, field)
                    .and_then(id_from_json)
                    .map(|v| (field.clone(), v))
            })
            .collect();
        Some(SearchHit {
            id: EntityId::new(id),
            fields,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take_failure<K: std::hash::Hash + Eq>(failures: &Mutex<HashMap<K, u32>>, key: &K) -> bool {
    let mut failures = lock(failures);
    match failures.get_mut(key) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl ListingApi for MockListingApi {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, FetchError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);

        if take_failure(&self.search_failures, &query.partition.to_string()) {
            return Err(FetchError::ServerError(503));
        }
        if query.page == 0 || query.page > self.max_pages {
            return Err(FetchError::ClientError(400));
        }

        let matched: Vec<&Value> = self
            .catalog
            .iter()
            .filter(|hit| self.matches(hit, query))
            .collect();

        let per_page = query.per_page as usize;
        let start = (query.page as usize - 1) * per_page;
        let page_values: Vec<&Value> = matched.iter().skip(start).take(per_page).copied().collect();

        Ok(SearchPage {
            total_hits: matched.len() as u64,
            result_count: page_values.len(),
            hits: page_values.iter().filter_map(|v| self.to_hit(v)).collect(),
        })
    }

    async fn detail(&self, id: &EntityId) -> Result<Value, FetchError> {
        *lock(&self.detail_calls).entry(id.clone()).or_insert(0) += 1;

        if self.gone.contains(id) {
            return Err(FetchError::NotFound);
        }
        if take_failure(&self.detail_failures, id) {
            return Err(FetchError::ServerError(503));
        }
        self.details.get(id).cloned().ok_or(FetchError::NotFound)
    }
}
