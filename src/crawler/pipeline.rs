//! Ingestion run orchestration
//!
//! One [`IngestPipeline::run`] drives the run state machine:
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────┐   ┌─────────────────────┐   ┌──────────┐
//! │ Planning │──▶│ Discovering │──▶│ Filtering │──▶│ FetchingAndLoading  │──▶│ Draining │
//! └──────────┘   └─────────────┘   └───────────┘   └─────────────────────┘   └──────────┘
//!                       │                            │                 │
//!                   (dry run)                 fetch + map ──mpsc──▶ loader
//!                       ▼
//!     Completed | CompletedWithErrors | Cancelled
//!
//! Any fatal error ends the run in `Failed`.
//! ```
//!
//! Fetch outcomes are mapped as they arrive and sent over a bounded channel to
//! a single loader task, so a slow store pushes back on the fetcher.
//!
//! # Example
//!
//! ```no_run
//! use estate_ingest::config::Config;
//! use estate_ingest::crawler::PipelineBuilder;
//! use estate_ingest::models::PrimaryPartition;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> estate_ingest::error::Result<()> {
//! let pipeline = PipelineBuilder::new(Config::default()).dry_run(true).build()?;
//! let summary = pipeline
//!     .run(&[PrimaryPartition::new("københavn")], CancellationToken::new())
//!     .await?;
//!
//! println!("Discovered {} ids", summary.discovered);
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::crawler::client::{HttpListingApi, SharedListingApi};
use crate::crawler::fetcher::{DetailFetcher, FetchOutcome};
use crate::crawler::list::IdDiscovery;
use crate::crawler::planner::{PartitionPlanner, PlannerSettings};
use crate::crawler::rate_limit::RequestGate;
use crate::error::{Error, Result};
use crate::metrics::{IngestEvent, SharedReporter, TracingReporter};
use crate::models::{EntityId, PrimaryPartition, RunState, RunSummary};
use crate::parser::{MappedRecord, RecordMapper};
use crate::storage::{create_sqlite_store, BatchLoader, ExistenceFilter, SharedRecordStore};

// ============================================================================
// Run Options
// ============================================================================

/// Per-run switches
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after discovery and report the ids
    pub dry_run: bool,

    /// Re-fetch ids that are already stored
    pub refresh: bool,

    /// Cap on the work set
    pub limit: Option<usize>,
}

// ============================================================================
// Run Statistics
// ============================================================================

/// Fetch-side counters (thread-safe)
#[derive(Debug, Default)]
pub struct RunStats {
    pub fetched: AtomicU64,
    pub gone: AtomicU64,
    pub fetch_failed: AtomicU64,
    pub mapping_failed: AtomicU64,
}

impl RunStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tally one fetch outcome
    pub fn record_outcome(&self, outcome: &FetchOutcome) {
        let counter = match outcome {
            FetchOutcome::Fetched { .. } => &self.fetched,
            FetchOutcome::Gone { .. } => &self.gone,
            FetchOutcome::Failed { .. } => &self.fetch_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mapping_failure(&self) {
        self.mapping_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Outcomes handled so far
    pub fn processed(&self) -> u64 {
        self.fetched.load(Ordering::Relaxed)
            + self.gone.load(Ordering::Relaxed)
            + self.fetch_failed.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        for counter in [
            &self.fetched,
            &self.gone,
            &self.fetch_failed,
            &self.mapping_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn apply_to(&self, summary: &mut RunSummary) {
        summary.fetched = self.fetched.load(Ordering::Relaxed);
        summary.gone = self.gone.load(Ordering::Relaxed);
        summary.fetch_failed = self.fetch_failed.load(Ordering::Relaxed);
        summary.mapping_failed = self.mapping_failed.load(Ordering::Relaxed);
    }
}

// ============================================================================
// Pipeline Implementation
// ============================================================================

/// Full ingestion pipeline
pub struct IngestPipeline {
    config: Config,
    options: RunOptions,
    api: SharedListingApi,
    store: SharedRecordStore,
    gate: Arc<RequestGate>,
    reporter: SharedReporter,
    mapper: RecordMapper,
    stats: Arc<RunStats>,
    state: Mutex<RunState>,
}

impl IngestPipeline {
    /// Current run state
    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Live fetch counters
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    fn advance(&self, next: RunState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let from = *state;
        debug_assert!(
            from.can_advance_to(next),
            "run state moved backwards: {from} -> {next}"
        );
        if !from.can_advance_to(next) {
            tracing::error!(%from, to = %next, "Ignoring backward state transition");
            return;
        }
        *state = next;
        drop(state);
        self.reporter.report(IngestEvent::StateChanged { from, to: next });
    }

    fn finish(&self, mut summary: RunSummary, started: Instant, cancel: &CancellationToken) -> RunSummary {
        let terminal = if cancel.is_cancelled() {
            RunState::Cancelled
        } else if summary.has_errors() {
            RunState::CompletedWithErrors
        } else {
            RunState::Completed
        };
        self.advance(terminal);

        summary.state = Some(terminal);
        summary.duration_ms = started.elapsed().as_millis() as u64;
        summary.requests = self.gate.granted();
        self.reporter.report(IngestEvent::RunCompleted { summary: &summary });
        summary
    }

    /// Run one ingestion over the given primary partitions
    ///
    /// Per-partition and per-record failures are tallied in the summary.
    ///
    /// # Errors
    ///
    /// Fatal conditions only: every primary partition failing to count, or
    /// the store becoming unavailable.
    pub async fn run(
        &self,
        primaries: &[PrimaryPartition],
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if *state != RunState::Idle && !state.is_terminal() {
                return Err(Error::other("a run is already in progress"));
            }
            *state = RunState::Idle;
        }
        self.stats.reset();

        let run_id = uuid::Uuid::new_v4().to_string();
        let result = self.execute(&run_id, primaries, &cancel).await;
        if let Err(error) = &result {
            let state = self.state();
            self.advance(RunState::Failed);
            self.reporter.report(IngestEvent::RunFailed {
                run_id: &run_id,
                state,
                error,
            });
        }
        result
    }

    async fn execute(
        &self,
        run_id: &str,
        primaries: &[PrimaryPartition],
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {

        let started = Instant::now();
        let mut summary = RunSummary {
            run_id: run_id.to_string(),
            dry_run: self.options.dry_run,
            started_at: Some(Utc::now()),
            ..RunSummary::default()
        };

        self.reporter.report(IngestEvent::RunStarted {
            run_id: &summary.run_id,
            partitions: primaries.len(),
            dry_run: self.options.dry_run,
        });

        // Planning
        self.advance(RunState::Planning);
        let retry = self.config.retry_config();
        let planner = PartitionPlanner::new(
            self.api.clone(),
            self.gate.clone(),
            retry.clone(),
            PlannerSettings::from_config(&self.config),
            self.reporter.clone(),
        );
        let plan = planner.plan(primaries).await?;

        summary.partitions_final = plan.finals.len() as u64;
        summary.partitions_irreducible = plan.irreducible_count() as u64;
        summary.partitions_failed = plan.failed.len() as u64;
        summary
            .failed_partitions
            .extend(plan.failed.iter().map(|f| f.partition.to_string()));

        if cancel.is_cancelled() {
            return Ok(self.finish(summary, started, cancel));
        }

        // Discovering
        self.advance(RunState::Discovering);
        let discovery = IdDiscovery::new(
            self.api.clone(),
            self.gate.clone(),
            retry.clone(),
            self.reporter.clone(),
        )
        .with_paging(self.config.api.per_page, self.config.api.max_pages)
        .with_concurrency(self.config.ingest.discovery_concurrency);
        let discovered = discovery.discover_all(&plan, cancel).await;

        summary.partitions_incomplete = discovered.incomplete_count() as u64;
        for failed in discovered.failed() {
            summary.partitions_failed += 1;
            summary.failed_partitions.push(failed.partition.to_string());
        }
        summary.discovered = discovered.ids.len() as u64;
        summary.duplicate_ids = discovered.duplicates;

        if self.options.dry_run {
            summary.discovered_ids = discovered.ids;
            return Ok(self.finish(summary, started, cancel));
        }
        if cancel.is_cancelled() {
            return Ok(self.finish(summary, started, cancel));
        }

        // Filtering
        self.advance(RunState::Filtering);
        let mut work_set = if self.options.refresh {
            discovered.ids
        } else {
            let filtered = ExistenceFilter::new(
                self.store.clone(),
                self.config.ingest.existence_chunk_size,
            )
            .filter(discovered.ids)
            .await?;
            summary.skipped_existing = filtered.skipped.len() as u64;
            filtered.work_set
        };
        if let Some(limit) = self.options.limit {
            work_set.truncate(limit);
        }
        summary.work_set = work_set.len() as u64;

        self.reporter.report(IngestEvent::WorkSetReady {
            discovered: summary.discovered,
            duplicates: summary.duplicate_ids,
            skipped_existing: summary.skipped_existing,
            work_set: summary.work_set,
        });

        if cancel.is_cancelled() {
            return Ok(self.finish(summary, started, cancel));
        }

        // Fetching and loading
        self.advance(RunState::FetchingAndLoading);
        let (tx, rx) = mpsc::channel::<MappedRecord>(self.config.ingest.channel_buffer_size);
        let loader = BatchLoader::new(
            self.store.clone(),
            self.config.ingest.batch_size,
            self.reporter.clone(),
        )
        .with_isolation(self.config.ingest.isolate_failures);
        let loader_handle = tokio::spawn(loader.run(rx, cancel.clone()));

        let fetcher = DetailFetcher::new(
            self.api.clone(),
            self.gate.clone(),
            retry,
            self.config.ingest.concurrency,
        );
        self.consume(fetcher, work_set, cancel, tx).await;

        // Draining
        self.advance(RunState::Draining);
        let loaded = loader_handle.await??;

        self.stats.apply_to(&mut summary);
        summary.written = loaded.written;
        summary.load_failed = loaded.failed;
        summary.discarded = loaded.discarded;
        summary.batches_committed = loaded.batches_committed;
        summary.batches_failed = loaded.batches_failed;

        Ok(self.finish(summary, started, cancel))
    }

    /// Map fetch outcomes as they complete and hand records to the loader
    async fn consume(
        &self,
        fetcher: DetailFetcher,
        work_set: Vec<EntityId>,
        cancel: &CancellationToken,
        tx: mpsc::Sender<MappedRecord>,
    ) {
        let outcomes = fetcher.fetch_all(work_set, cancel.clone());
        futures::pin_mut!(outcomes);

        while let Some(outcome) = outcomes.next().await {
            self.stats.record_outcome(&outcome);

            match outcome {
                FetchOutcome::Fetched {
                    id,
                    payload,
                    attempts,
                } => {
                    self.reporter
                        .report(IngestEvent::RecordFetched { id: &id, attempts });

                    match self.mapper.map(&payload, Utc::now()) {
                        Ok(record) => {
                            if tx.send(record).await.is_err() {
                                tracing::error!("Loader stopped; abandoning remaining fetches");
                                break;
                            }
                        }
                        Err(e) => {
                            self.stats.record_mapping_failure();
                            self.reporter.report(IngestEvent::MappingFailed {
                                id: &id,
                                error: &e.to_string(),
                            });
                        }
                    }
                }
                FetchOutcome::Gone { id } => {
                    self.reporter.report(IngestEvent::RecordGone { id: &id });
                }
                FetchOutcome::Failed {
                    id,
                    error,
                    attempts,
                } => {
                    self.reporter.report(IngestEvent::FetchFailed {
                        id: &id,
                        attempts,
                        error: &error,
                    });
                }
            }
        }
    }
}

// ============================================================================
// Pipeline Builder
// ============================================================================

/// Builder for IngestPipeline
///
/// Anything not supplied is built from the configuration: the HTTP client,
/// the SQLite store, the request gate and a tracing reporter.
pub struct PipelineBuilder {
    config: Config,
    options: RunOptions,
    api: Option<SharedListingApi>,
    store: Option<SharedRecordStore>,
    gate: Option<Arc<RequestGate>>,
    reporter: Option<SharedReporter>,
}

impl PipelineBuilder {
    /// Create a new builder
    pub fn new(config: Config) -> Self {
        Self {
            config,
            options: RunOptions::default(),
            api: None,
            store: None,
            gate: None,
            reporter: None,
        }
    }

    /// Use a specific listing API
    pub fn api(mut self, api: SharedListingApi) -> Self {
        self.api = Some(api);
        self
    }

    /// Use a specific record store
    pub fn store(mut self, store: SharedRecordStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Share an existing request gate
    pub fn gate(mut self, gate: Arc<RequestGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.options.dry_run = enabled;
        self
    }

    pub fn refresh(mut self, enabled: bool) -> Self {
        self.options.refresh = enabled;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.options.limit = limit;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<IngestPipeline> {
        self.config
            .validate()
            .map_err(|e| Error::config(e.to_string()))?;

        let api = match self.api {
            Some(api) => api,
            None => Arc::new(HttpListingApi::new(&self.config.api)?),
        };
        let store = match self.store {
            Some(store) => store,
            None => create_sqlite_store(&self.config.database.sqlite_path)?,
        };
        let gate = match self.gate {
            Some(gate) => gate,
            None => Arc::new(RequestGate::new(
                self.config.ingest.rate_limit,
                self.config.ingest.burst,
            )?),
        };
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(TracingReporter));

        Ok(IngestPipeline {
            mapper: RecordMapper::from_config(&self.config.api),
            config: self.config,
            options: self.options,
            api,
            store,
            gate,
            reporter,
            stats: RunStats::new(),
            state: Mutex::new(RunState::Idle),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
