//! Partition planning under the result ceiling
//!
//! The search API never returns more than `per_page * max_pages` results for
//! one query. The planner counts every primary partition, and splits any
//! partition above that ceiling by the values of the next subdivision key found
//! in a bounded sample of its results, until every final partition fits.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::config::{Config, SubdivisionKey};
use crate::crawler::client::{field_histogram, SharedListingApi};
use crate::crawler::gated_search;
use crate::crawler::rate_limit::RequestGate;
use crate::metrics::{IngestEvent, SharedReporter};
use crate::models::{Partition, PrimaryPartition, SearchQuery};
use crate::utils::error::PlanningError;
use crate::utils::retry::RetryConfig;

/// Planner tuning, derived from [`Config`]
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    /// Maximum results retrievable from one query
    pub ceiling: u64,
    pub safety_margin: u64,
    pub per_page: u32,
    pub max_pages: u32,
    pub count_page_size: u32,
    pub sample_limit: usize,
    pub concurrency: usize,
    pub primary_param: String,
    pub subdivision_keys: Vec<SubdivisionKey>,
}

impl PlannerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ceiling: config.ceiling(),
            safety_margin: config.ingest.safety_margin,
            per_page: config.api.per_page,
            max_pages: config.api.max_pages,
            count_page_size: config.ingest.count_page_size,
            sample_limit: config.ingest.sample_limit,
            concurrency: config.ingest.discovery_concurrency.max(1),
            primary_param: config.api.primary_param.clone(),
            subdivision_keys: config.api.subdivision_keys.clone(),
        }
    }

    /// Totals above this are subdivided
    pub fn threshold(&self) -> u64 {
        self.ceiling.saturating_sub(self.safety_margin)
    }

    /// Pages read when sampling a partition for key values
    fn sample_pages(&self) -> u32 {
        let per_page = self.per_page.max(1) as usize;
        let pages = self.sample_limit.div_ceil(per_page).max(1);
        u32::try_from(pages).unwrap_or(u32::MAX).min(self.max_pages)
    }
}

/// A partition ready for discovery
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPartition {
    pub partition: Partition,
    pub total_hits: u64,
    /// Above the ceiling with no subdivision key left; only its first
    /// `ceiling` results are reachable
    pub irreducible: bool,
}

/// A partition skipped because its queries failed
#[derive(Debug, Clone, PartialEq)]
pub struct FailedPartition {
    pub partition: Partition,
    pub error: String,
}

/// Outcome of planning
#[derive(Debug, Clone, Default)]
pub struct PartitionPlan {
    pub finals: Vec<PlannedPartition>,
    pub failed: Vec<FailedPartition>,
    /// Partitions whose count was zero
    pub empty: usize,
    /// Subdivisions whose children did not add up to the parent total
    pub mismatches: usize,
}

impl PartitionPlan {
    pub fn irreducible_count(&self) -> usize {
        self.finals.iter().filter(|p| p.irreducible).count()
    }

    /// Sum of reported totals over all final partitions
    pub fn expected_total(&self) -> u64 {
        self.finals.iter().map(|p| p.total_hits).sum()
    }

    fn merge(&mut self, other: PartitionPlan) {
        self.finals.extend(other.finals);
        self.failed.extend(other.failed);
        self.empty += other.empty;
        self.mismatches += other.mismatches;
    }
}

struct KeySample {
    values: BTreeMap<String, u64>,
    sampled: usize,
    missing: u64,
}

/// Computes final partitions for a set of primary scopes
pub struct PartitionPlanner {
    api: SharedListingApi,
    gate: Arc<RequestGate>,
    retry: RetryConfig,
    settings: PlannerSettings,
    reporter: SharedReporter,
}

impl PartitionPlanner {
    pub fn new(
        api: SharedListingApi,
        gate: Arc<RequestGate>,
        retry: RetryConfig,
        settings: PlannerSettings,
        reporter: SharedReporter,
    ) -> Self {
        Self {
            api,
            gate,
            retry,
            settings,
            reporter,
        }
    }

    /// Plan all primary partitions
    ///
    /// Failed partitions are recorded in the plan and skipped.
    ///
    /// # Errors
    ///
    /// `PlanningError::NoPartitions` for an empty input and
    /// `PlanningError::AllPartitionsFailed` when no primary count succeeds.
    pub async fn plan(&self, primaries: &[PrimaryPartition]) -> Result<PartitionPlan, PlanningError> {
        if primaries.is_empty() {
            return Err(PlanningError::NoPartitions);
        }

        let results: Vec<(PartitionPlan, bool)> = stream::iter(primaries)
            .map(|primary| {
                self.plan_primary(Partition::primary(
                    self.settings.primary_param.as_str(),
                    primary.name.as_str(),
                ))
            })
            .buffered(self.settings.concurrency)
            .collect()
            .await;

        let mut plan = PartitionPlan::default();
        let mut count_failures = 0;
        for (sub_plan, count_failed) in results {
            if count_failed {
                count_failures += 1;
            }
            plan.merge(sub_plan);
        }

        if count_failures == primaries.len() {
            return Err(PlanningError::AllPartitionsFailed {
                count: count_failures,
            });
        }

        tracing::info!(
            finals = plan.finals.len(),
            failed = plan.failed.len(),
            irreducible = plan.irreducible_count(),
            empty = plan.empty,
            expected_total = plan.expected_total(),
            "Partition plan ready"
        );

        Ok(plan)
    }

    /// Plan one primary partition; the flag is set when its own count failed
    async fn plan_primary(&self, primary: Partition) -> (PartitionPlan, bool) {
        let mut plan = PartitionPlan::default();

        let total = match self.count(&primary).await {
            Ok(total) => total,
            Err(e) => {
                self.fail(&mut plan, primary, &e);
                return (plan, true);
            }
        };

        let mut pending = VecDeque::from([(primary, total, 0usize)]);

        while let Some((partition, total, key_index)) = pending.pop_front() {
            if total == 0 {
                plan.empty += 1;
                continue;
            }

            if total <= self.settings.threshold() {
                plan.finals.push(PlannedPartition {
                    partition,
                    total_hits: total,
                    irreducible: false,
                });
                continue;
            }

            let Some(key) = self.settings.subdivision_keys.get(key_index) else {
                self.reporter.report(IngestEvent::PartitionIrreducible {
                    partition: &partition,
                    total_hits: total,
                });
                plan.finals.push(PlannedPartition {
                    partition,
                    total_hits: total,
                    irreducible: true,
                });
                continue;
            };

            let sample = match self.sample(&partition, key).await {
                Ok(sample) => sample,
                Err(e) => {
                    self.fail(&mut plan, partition, &e);
                    continue;
                }
            };

            if sample.values.is_empty() {
                tracing::warn!(
                    partition = %partition,
                    key = %key.field,
                    "No values of subdivision key in sample, trying next key"
                );
                pending.push_back((partition, total, key_index + 1));
                continue;
            }

            self.reporter.report(IngestEvent::PartitionSubdivided {
                partition: &partition,
                key: &key.param,
                children: sample.values.len(),
                sampled: sample.sampled,
                unreachable: sample.missing,
            });

            let children: Vec<Partition> = sample
                .values
                .keys()
                .map(|value| partition.refine(key.param.as_str(), value.as_str()))
                .collect();

            let counts: Vec<(Partition, Result<u64, PlanningError>)> = stream::iter(children)
                .map(|child| async move {
                    let count = self.count(&child).await;
                    (child, count)
                })
                .buffered(self.settings.concurrency)
                .collect()
                .await;

            let mut children_total = 0u64;
            for (child, count) in counts {
                match count {
                    Ok(child_total) => {
                        children_total += child_total;
                        pending.push_back((child, child_total, key_index + 1));
                    }
                    Err(e) => self.fail(&mut plan, child, &e),
                }
            }

            if children_total != total {
                plan.mismatches += 1;
                self.reporter.report(IngestEvent::SampleMismatch {
                    partition: &partition,
                    parent_total: total,
                    children_total,
                });
            }
        }

        (plan, false)
    }

    /// Count-only query with bounded retry
    async fn count(&self, partition: &Partition) -> Result<u64, PlanningError> {
        let query = SearchQuery::new(partition.clone(), 1, self.settings.count_page_size);

        match gated_search(self.api.as_ref(), &self.gate, &self.retry, &query).await {
            Ok((page, _)) => {
                self.reporter.report(IngestEvent::PartitionCounted {
                    partition,
                    total_hits: page.total_hits,
                });
                Ok(page.total_hits)
            }
            Err(e) => Err(PlanningError::CountFailed {
                partition: partition.to_string(),
                attempts: e.attempts,
                reason: e.error.to_string(),
            }),
        }
    }

    /// Read up to `sample_limit` results and tally values of `key`
    async fn sample(
        &self,
        partition: &Partition,
        key: &SubdivisionKey,
    ) -> Result<KeySample, PlanningError> {
        let mut values: BTreeMap<String, u64> = BTreeMap::new();
        let mut sampled = 0;
        let mut missing = 0;

        for page in 1..=self.settings.sample_pages() {
            let query = SearchQuery::new(partition.clone(), page, self.settings.per_page);
            let (result, _) = gated_search(self.api.as_ref(), &self.gate, &self.retry, &query)
                .await
                .map_err(|e| PlanningError::SampleFailed {
                    partition: partition.to_string(),
                    page,
                    reason: e.to_string(),
                })?;

            let (counts, page_missing) = field_histogram(&result.hits, &key.field);
            for (value, count) in counts {
                *values.entry(value).or_insert(0) += count;
            }
            missing += page_missing;
            sampled += result.result_count;

            if result.result_count < self.settings.per_page as usize
                || sampled >= self.settings.sample_limit
            {
                break;
            }
        }

        Ok(KeySample {
            values,
            sampled,
            missing,
        })
    }

    fn fail(&self, plan: &mut PartitionPlan, partition: Partition, error: &PlanningError) {
        let error = error.to_string();
        self.reporter.report(IngestEvent::PartitionFailed {
            partition: &partition,
            error: &error,
        });
        plan.failed.push(FailedPartition { partition, error });
    }
}
