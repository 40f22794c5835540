//! Prometheus metrics for ingestion runs
//!
//! [`IngestMetrics`] owns its own [`Registry`], so several pipelines (or
//! tests) can run in one process without sharing counters. It implements
//! [`ProgressReporter`] and is fed by the same events as the log output.
//!
//! # Usage
//!
//! ```ignore
//! let metrics = Arc::new(IngestMetrics::new()?);
//! let reporter = FanoutReporter::new()
//!     .with(Arc::new(TracingReporter))
//!     .with(metrics.clone());
//! // ... run the pipeline with `reporter` ...
//! std::fs::write("metrics.prom", metrics.encode()?)?;
//! ```

pub mod progress;

pub use progress::{
    FanoutReporter, IngestEvent, ProgressReporter, SharedReporter, SilentReporter,
    TracingReporter,
};

use crate::error::IngestErrorTrait;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

/// Metric name prefix
const NAMESPACE: &str = "estate_ingest";

/// Counters and gauges of one ingestion pipeline
pub struct IngestMetrics {
    registry: Registry,
    partitions: CounterVec,
    discovered_ids: Counter,
    duplicate_ids: Counter,
    skipped_existing: Counter,
    work_set: Gauge,
    fetch_outcomes: CounterVec,
    fetch_attempts: Histogram,
    mapping_failures: Counter,
    records_written: Counter,
    record_write_failures: Counter,
    batches: CounterVec,
    requests: Gauge,
    run_duration: Gauge,
    run_failures: CounterVec,
}

impl IngestMetrics {
    /// Create and register all metrics in a fresh registry
    ///
    /// # Errors
    ///
    /// Returns a prometheus error if a metric definition is invalid
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let partitions = CounterVec::new(
            Opts::new("partitions_total", "Partitions by planning/discovery outcome")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;
        let discovered_ids = Counter::with_opts(
            Opts::new("discovered_ids_total", "Entity ids discovered").namespace(NAMESPACE),
        )?;
        let duplicate_ids = Counter::with_opts(
            Opts::new(
                "duplicate_ids_total",
                "Ids seen in more than one partition",
            )
            .namespace(NAMESPACE),
        )?;
        let skipped_existing = Counter::with_opts(
            Opts::new("skipped_existing_total", "Ids skipped because already stored")
                .namespace(NAMESPACE),
        )?;
        let work_set = Gauge::with_opts(
            Opts::new("work_set_size", "Ids scheduled for detail fetch").namespace(NAMESPACE),
        )?;
        let fetch_outcomes = CounterVec::new(
            Opts::new("fetch_outcomes_total", "Detail fetches by outcome").namespace(NAMESPACE),
            &["outcome"],
        )?;
        let fetch_attempts = Histogram::with_opts(
            HistogramOpts::new("fetch_attempts", "Attempts used per detail fetch")
                .namespace(NAMESPACE)
                .buckets(vec![1.0, 2.0, 3.0, 4.0, 6.0, 8.0]),
        )?;
        let mapping_failures = Counter::with_opts(
            Opts::new("mapping_failures_total", "Payloads that failed mapping")
                .namespace(NAMESPACE),
        )?;
        let records_written = Counter::with_opts(
            Opts::new("records_written_total", "Records committed to the store")
                .namespace(NAMESPACE),
        )?;
        let record_write_failures = Counter::with_opts(
            Opts::new("record_write_failures_total", "Records rejected by the store")
                .namespace(NAMESPACE),
        )?;
        let batches = CounterVec::new(
            Opts::new("batches_total", "Batch transactions by status").namespace(NAMESPACE),
            &["status"],
        )?;
        let requests = Gauge::with_opts(
            Opts::new("requests", "Requests admitted by the rate limiter").namespace(NAMESPACE),
        )?;
        let run_duration = Gauge::with_opts(
            Opts::new("run_duration_seconds", "Duration of the last run").namespace(NAMESPACE),
        )?;

        registry.register(Box::new(partitions.clone()))?;
        registry.register(Box::new(discovered_ids.clone()))?;
        registry.register(Box::new(duplicate_ids.clone()))?;
        registry.register(Box::new(skipped_existing.clone()))?;
        registry.register(Box::new(work_set.clone()))?;
        registry.register(Box::new(fetch_outcomes.clone()))?;
        registry.register(Box::new(fetch_attempts.clone()))?;
        registry.register(Box::new(mapping_failures.clone()))?;
        registry.register(Box::new(records_written.clone()))?;
        registry.register(Box::new(record_write_failures.clone()))?;
        registry.register(Box::new(batches.clone()))?;
        registry.register(Box::new(requests.clone()))?;
        let run_failures = CounterVec::new(
            Opts::new("run_failures_total", "Runs aborted by a fatal error").namespace(NAMESPACE),
            &["category"],
        )?;

        registry.register(Box::new(run_duration.clone()))?;
        registry.register(Box::new(run_failures.clone()))?;

        Ok(Self {
            registry,
            partitions,
            discovered_ids,
            duplicate_ids,
            skipped_existing,
            work_set,
            fetch_outcomes,
            fetch_attempts,
            mapping_failures,
            records_written,
            record_write_failures,
            batches,
            requests,
            run_duration,
            run_failures,
        })
    }

    /// Render all metrics in the Prometheus text exposition format
    ///
    /// # Errors
    ///
    /// Returns a prometheus error if encoding fails
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// The registry backing these metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn partition(&self, outcome: &str) {
        self.partitions.with_label_values(&[outcome]).inc();
    }

    fn fetch(&self, outcome: &str, attempts: u32) {
        self.fetch_outcomes.with_label_values(&[outcome]).inc();
        self.fetch_attempts.observe(f64::from(attempts));
    }
}

impl ProgressReporter for IngestMetrics {
    fn report(&self, event: IngestEvent<'_>) {
        match event {
            IngestEvent::PartitionSubdivided { .. } => self.partition("subdivided"),
            IngestEvent::PartitionIrreducible { .. } => self.partition("irreducible"),
            IngestEvent::PartitionFailed { .. } => self.partition("failed"),
            IngestEvent::PartitionDiscovered {
                discovered,
                complete,
                ..
            } => {
                self.partition(if complete { "complete" } else { "incomplete" });
                self.discovered_ids.inc_by(discovered as f64);
            }
            IngestEvent::WorkSetReady {
                duplicates,
                skipped_existing,
                work_set,
                ..
            } => {
                self.duplicate_ids.inc_by(duplicates as f64);
                self.skipped_existing.inc_by(skipped_existing as f64);
                self.work_set.set(work_set as f64);
            }
            IngestEvent::RecordFetched { attempts, .. } => self.fetch("fetched", attempts),
            IngestEvent::RecordGone { .. } => self.fetch("gone", 1),
            IngestEvent::FetchFailed { attempts, .. } => self.fetch("failed", attempts),
            IngestEvent::MappingFailed { .. } => self.mapping_failures.inc(),
            IngestEvent::BatchCommitted { records, .. } => {
                self.batches.with_label_values(&["committed"]).inc();
                self.records_written.inc_by(records as f64);
            }
            IngestEvent::BatchFailed { .. } => {
                self.batches.with_label_values(&["failed"]).inc();
            }
            IngestEvent::RecordWriteFailed { .. } => self.record_write_failures.inc(),
            IngestEvent::RunCompleted { summary } => {
                self.requests.set(summary.requests as f64);
                self.run_duration.set(summary.duration_ms as f64 / 1000.0);
            }
            IngestEvent::RunFailed { error, .. } => {
                self.run_failures
                    .with_label_values(&[error.category().as_str()])
                    .inc();
            }
            IngestEvent::RunStarted { .. }
            | IngestEvent::StateChanged { .. }
            | IngestEvent::PartitionCounted { .. }
            | IngestEvent::SampleMismatch { .. } => {}
        }
    }
}
