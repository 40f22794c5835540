// Core data structures for the ingestion pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

/// Opaque, globally unique identifier of one upstream record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One query filter (`param=value`) applied to the search endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionFilter {
    pub param: String,
    pub value: String,
}

/// A query scope: the primary filter followed by zero or more subdivision filters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Partition {
    filters: Vec<PartitionFilter>,
}

impl Partition {
    /// Top-level partition scoped by a single filter
    pub fn primary(param: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            filters: vec![PartitionFilter {
                param: param.into(),
                value: value.into(),
            }],
        }
    }

    /// Child partition narrowed by one more filter
    #[must_use]
    pub fn refine(&self, param: impl Into<String>, value: impl Into<String>) -> Self {
        let mut filters = self.filters.clone();
        filters.push(PartitionFilter {
            param: param.into(),
            value: value.into(),
        });
        Self { filters }
    }

    pub fn filters(&self) -> &[PartitionFilter] {
        &self.filters
    }

    /// Number of subdivision filters below the primary scope
    pub fn depth(&self) -> usize {
        self.filters.len().saturating_sub(1)
    }

    /// Value of the primary filter
    pub fn primary_value(&self) -> Option<&str> {
        self.filters.first().map(|f| f.value.as_str())
    }

    /// Value of a filter by query parameter name
    pub fn value_of(&self, param: &str) -> Option<&str> {
        self.filters
            .iter()
            .find(|f| f.param == param)
            .map(|f| f.value.as_str())
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for filter in &self.filters {
            if !first {
                f.write_str(" / ")?;
            }
            write!(f, "{}={}", filter.param, filter.value)?;
            first = false;
        }
        Ok(())
    }
}

/// Candidate top-level scope supplied by the caller (e.g. a municipality name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryPartition {
    pub name: String,

    #[serde(default, alias = "distance_to_copenhagen_km")]
    pub distance_km: Option<f64>,
}

impl PrimaryPartition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            distance_km: None,
        }
    }
}

/// One page request against the search endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub partition: Partition,
    pub page: u32,
    pub per_page: u32,
}

impl SearchQuery {
    pub fn new(partition: Partition, page: u32, per_page: u32) -> Self {
        Self {
            partition,
            page,
            per_page,
        }
    }
}

/// One search result reduced to its id and the fields used for subdivision
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: EntityId,
    pub fields: HashMap<String, String>,
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    /// Total reported by the API for the whole query (authoritative)
    pub total_hits: u64,

    /// Hits on this page that carried an id
    pub hits: Vec<SearchHit>,

    /// Results on this page, including any without an id
    pub result_count: usize,
}

/// Run state machine; states only ever advance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Planning,
    Discovering,
    Filtering,
    FetchingAndLoading,
    Draining,
    Completed,
    CompletedWithErrors,
    Cancelled,
    /// Ended by a fatal error
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Discovering => "discovering",
            Self::Filtering => "filtering",
            Self::FetchingAndLoading => "fetching_and_loading",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Cancelled | Self::Failed
        )
    }

    /// Whether moving from `self` to `next` keeps the run moving forward
    pub fn can_advance_to(&self, next: RunState) -> bool {
        !self.is_terminal() && next > *self
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category tally of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub state: Option<RunState>,
    pub dry_run: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,

    pub partitions_final: u64,
    pub partitions_failed: u64,
    pub partitions_irreducible: u64,
    pub partitions_incomplete: u64,
    pub failed_partitions: Vec<String>,

    pub discovered: u64,
    pub duplicate_ids: u64,
    pub skipped_existing: u64,
    pub work_set: u64,
    /// Discovered ids; filled only for dry runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovered_ids: Vec<EntityId>,

    pub fetched: u64,
    pub gone: u64,
    pub fetch_failed: u64,
    pub mapping_failed: u64,

    pub written: u64,
    pub load_failed: u64,
    pub discarded: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,

    pub requests: u64,
}

impl RunSummary {
    /// Total failures that should surface to the operator
    pub fn failure_count(&self) -> u64 {
        self.partitions_failed
            + self.partitions_irreducible
            + self.fetch_failed
            + self.mapping_failed
            + self.load_failed
    }

    pub fn has_errors(&self) -> bool {
        self.failure_count() > 0
    }

    /// Share of fetched records that reached the store (0.0 - 1.0)
    pub fn write_rate(&self) -> f64 {
        if self.fetched == 0 {
            return 1.0;
        }
        self.written as f64 / self.fetched as f64
    }
}
