//! Progress reporting for ingestion runs.
//!
//! Pipeline stages emit [`IngestEvent`]s through a [`ProgressReporter`], so
//! logging, metrics and any other observer stay decoupled from the stages.

use std::sync::Arc;

use crate::error::{Error, IngestErrorTrait};
use crate::models::{EntityId, Partition, RunState, RunSummary};

/// Events emitted during an ingestion run.
#[derive(Debug, Clone)]
pub enum IngestEvent<'a> {
    /// Run starting.
    RunStarted {
        run_id: &'a str,
        /// Primary partitions requested.
        partitions: usize,
        dry_run: bool,
    },

    /// Run advanced to a new state.
    StateChanged { from: RunState, to: RunState },

    /// A partition's count query returned.
    PartitionCounted {
        partition: &'a Partition,
        total_hits: u64,
    },

    /// An oversized partition was split by a subdivision key.
    PartitionSubdivided {
        partition: &'a Partition,
        key: &'a str,
        children: usize,
        sampled: usize,
        /// Sampled hits that lacked the key.
        unreachable: u64,
    },

    /// Children of a subdivided partition do not add up to the parent total.
    SampleMismatch {
        partition: &'a Partition,
        parent_total: u64,
        children_total: u64,
    },

    /// A partition is still above the ceiling with no key left to split it.
    PartitionIrreducible {
        partition: &'a Partition,
        total_hits: u64,
    },

    /// A partition was skipped after its queries failed.
    PartitionFailed {
        partition: &'a Partition,
        error: &'a str,
    },

    /// Pagination of one final partition finished.
    PartitionDiscovered {
        partition: &'a Partition,
        reported_total: u64,
        discovered: usize,
        /// Discovered count matches the reported total.
        complete: bool,
    },

    /// Discovery and the existence filter produced the work set.
    WorkSetReady {
        discovered: u64,
        duplicates: u64,
        skipped_existing: u64,
        work_set: u64,
    },

    /// Detail payload fetched.
    RecordFetched { id: &'a EntityId, attempts: u32 },

    /// Entity no longer exists upstream.
    RecordGone { id: &'a EntityId },

    /// Detail fetch failed after retries.
    FetchFailed {
        id: &'a EntityId,
        attempts: u32,
        error: &'a str,
    },

    /// Payload could not be mapped; the record is dropped.
    MappingFailed { id: &'a EntityId, error: &'a str },

    /// A batch was committed.
    BatchCommitted {
        batch: u64,
        records: usize,
        /// Records written so far in this run.
        written_total: u64,
    },

    /// A batch transaction was rolled back.
    BatchFailed {
        batch: u64,
        records: usize,
        error: &'a str,
    },

    /// A single record could not be written.
    RecordWriteFailed { id: &'a EntityId, error: &'a str },

    /// Run finished.
    RunCompleted { summary: &'a RunSummary },

    /// Run aborted by a fatal error in `state`.
    RunFailed {
        run_id: &'a str,
        state: RunState,
        error: &'a Error,
    },
}

/// Trait for reporting ingestion progress.
///
/// The default implementation does nothing, which suits library usage.
pub trait ProgressReporter: Send + Sync {
    /// Called when an ingestion event occurs.
    fn report(&self, event: IngestEvent<'_>) {
        let _ = event;
    }
}

/// Shared reporter handle
pub type SharedReporter = Arc<dyn ProgressReporter>;

/// A no-op reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// A reporter that logs events using the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: IngestEvent<'_>) {
        use tracing::{debug, error, info, warn};

        match event {
            IngestEvent::RunStarted {
                run_id,
                partitions,
                dry_run,
            } => {
                info!(run_id, partitions, dry_run, "Starting ingestion run");
            }
            IngestEvent::StateChanged { from, to } => {
                debug!(from = %from, to = %to, "Run state changed");
            }
            IngestEvent::PartitionCounted {
                partition,
                total_hits,
            } => {
                debug!(partition = %partition, total_hits, "Partition counted");
            }
            IngestEvent::PartitionSubdivided {
                partition,
                key,
                children,
                sampled,
                unreachable,
            } => {
                info!(
                    partition = %partition,
                    key,
                    children,
                    sampled,
                    unreachable,
                    "Subdivided oversized partition"
                );
            }
            IngestEvent::SampleMismatch {
                partition,
                parent_total,
                children_total,
            } => {
                warn!(
                    partition = %partition,
                    parent_total,
                    children_total,
                    "Sampled subdivisions do not cover the partition total"
                );
            }
            IngestEvent::PartitionIrreducible {
                partition,
                total_hits,
            } => {
                error!(
                    partition = %partition,
                    total_hits,
                    "Partition exceeds the result ceiling and cannot be subdivided further"
                );
            }
            IngestEvent::PartitionFailed { partition, error } => {
                error!(partition = %partition, error, "Partition failed");
            }
            IngestEvent::PartitionDiscovered {
                partition,
                reported_total,
                discovered,
                complete,
            } => {
                if complete {
                    info!(partition = %partition, discovered, "Partition discovered");
                } else {
                    warn!(
                        partition = %partition,
                        reported_total,
                        discovered,
                        "Discovery incomplete: id count differs from reported total"
                    );
                }
            }
            IngestEvent::WorkSetReady {
                discovered,
                duplicates,
                skipped_existing,
                work_set,
            } => {
                info!(
                    discovered,
                    duplicates, skipped_existing, work_set, "Work set ready"
                );
            }
            IngestEvent::RecordFetched { id, attempts } => {
                debug!(id = %id, attempts, "Fetched");
            }
            IngestEvent::RecordGone { id } => {
                info!(id = %id, "Entity gone upstream");
            }
            IngestEvent::FetchFailed {
                id,
                attempts,
                error,
            } => {
                warn!(id = %id, attempts, error, "Fetch failed");
            }
            IngestEvent::MappingFailed { id, error } => {
                warn!(id = %id, error, "Mapping failed");
            }
            IngestEvent::BatchCommitted {
                batch,
                records,
                written_total,
            } => {
                info!(batch, records, written_total, "Batch committed");
            }
            IngestEvent::BatchFailed {
                batch,
                records,
                error,
            } => {
                warn!(batch, records, error, "Batch rolled back");
            }
            IngestEvent::RecordWriteFailed { id, error } => {
                error!(id = %id, error, "Record write failed");
            }
            IngestEvent::RunCompleted { summary } => {
                info!(
                    run_id = %summary.run_id,
                    state = ?summary.state,
                    discovered = summary.discovered,
                    skipped = summary.skipped_existing,
                    fetched = summary.fetched,
                    gone = summary.gone,
                    written = summary.written,
                    failures = summary.failure_count(),
                    duration_ms = summary.duration_ms,
                    "Ingestion run finished"
                );
            }
            IngestEvent::RunFailed {
                run_id,
                state,
                error,
            } => {
                error!(
                    run_id,
                    state = %state,
                    category = error.category().as_str(),
                    recoverable = error.is_recoverable(),
                    error = %error,
                    "Ingestion run failed"
                );
            }
        }
    }
}

/// Forwards every event to several reporters in order.
#[derive(Default, Clone)]
pub struct FanoutReporter {
    reporters: Vec<SharedReporter>,
}

impl FanoutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, reporter: SharedReporter) -> Self {
        self.reporters.push(reporter);
        self
    }
}

impl ProgressReporter for FanoutReporter {
    fn report(&self, event: IngestEvent<'_>) {
        for reporter in &self.reporters {
            reporter.report(event.clone());
        }
    }
}
