use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use estate_ingest::config::{load_partitions, parse_partition_list, within_distance, Config};
use estate_ingest::crawler::PipelineBuilder;
use estate_ingest::metrics::{FanoutReporter, IngestMetrics, TracingReporter};
use estate_ingest::models::{PrimaryPartition, RunSummary};
use estate_ingest::utils::{format_duration, rate_per_second};

/// Options of the `ingest` command
#[derive(Debug, Clone, Default)]
pub struct IngestParams {
    pub partitions: Option<String>,
    pub partitions_file: Option<PathBuf>,
    pub max_distance: Option<f64>,
    pub concurrency: Option<usize>,
    pub rate: Option<f64>,
    pub batch_size: Option<usize>,
    pub database: Option<PathBuf>,
    pub dry_run: bool,
    pub refresh: bool,
    pub limit: Option<usize>,
    pub strict: bool,
    pub metrics_file: Option<PathBuf>,
}

impl IngestParams {
    fn apply(&self, config: &mut Config) {
        if let Some(concurrency) = self.concurrency {
            config.ingest.concurrency = concurrency;
        }
        if let Some(rate) = self.rate {
            config.ingest.rate_limit = rate;
        }
        if let Some(batch_size) = self.batch_size {
            config.ingest.batch_size = batch_size;
        }
        if let Some(database) = &self.database {
            config.database.sqlite_path = database.clone();
        }
    }

    fn primaries(&self) -> Result<Vec<PrimaryPartition>> {
        let mut primaries = Vec::new();
        if let Some(raw) = &self.partitions {
            primaries.extend(parse_partition_list(raw));
        }
        if let Some(path) = &self.partitions_file {
            primaries.extend(load_partitions(path)?);
        }
        if let Some(max_km) = self.max_distance {
            primaries = within_distance(primaries, max_km);
        }
        if primaries.is_empty() {
            anyhow::bail!("No partitions given; use --partitions or --partitions-file");
        }
        Ok(primaries)
    }
}

pub async fn ingest(mut config: Config, params: IngestParams) -> Result<()> {
    params.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    let primaries = params.primaries()?;

    println!("Starting ingestion");
    println!("==================");
    println!("Partitions:  {}", primaries.len());
    println!("Concurrency: {}", config.ingest.concurrency);
    println!("Rate limit:  {:.1} req/s", config.ingest.rate_limit);
    println!("Batch size:  {}", config.ingest.batch_size);
    println!("Database:    {}", config.database.sqlite_path.display());
    if params.dry_run {
        println!("Mode:        dry run");
    }

    let metrics = Arc::new(IngestMetrics::new().context("Failed to register metrics")?);
    let reporter = FanoutReporter::new()
        .with(Arc::new(TracingReporter))
        .with(metrics.clone());

    let pipeline = PipelineBuilder::new(config)
        .reporter(Arc::new(reporter))
        .dry_run(params.dry_run)
        .refresh(params.refresh)
        .limit(params.limit)
        .build()
        .context("Failed to build pipeline")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work");
            signal_cancel.cancel();
        }
    });

    let summary = pipeline.run(&primaries, cancel).await?;

    print_summary(&summary);

    if let Some(path) = &params.metrics_file {
        let text = metrics.encode().context("Failed to encode metrics")?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write metrics file: {}", path.display()))?;
        println!("Metrics written to {}", path.display());
    }

    if params.strict && summary.has_errors() {
        anyhow::bail!(
            "Run finished with {} failures (strict mode)",
            summary.failure_count()
        );
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let state = summary.state.map_or("unknown", |s| s.as_str());

    println!("\nIngestion Summary");
    println!("=================");
    println!("Run:        {} ({state})", summary.run_id);
    println!(
        "Duration:   {}",
        format_duration(Duration::from_millis(summary.duration_ms))
    );
    println!("Requests:   {}", summary.requests);
    println!();
    println!(
        "Partitions: {} final, {} failed, {} irreducible, {} incomplete",
        summary.partitions_final,
        summary.partitions_failed,
        summary.partitions_irreducible,
        summary.partitions_incomplete
    );
    for partition in &summary.failed_partitions {
        println!("  failed: {partition}");
    }
    println!(
        "Discovered: {} ({} duplicates)",
        summary.discovered, summary.duplicate_ids
    );

    if summary.dry_run {
        for id in &summary.discovered_ids {
            println!("  {id}");
        }
        return;
    }

    println!("Skipped:    {} already stored", summary.skipped_existing);
    println!("Work set:   {}", summary.work_set);
    println!(
        "Fetched:    {} ({} gone, {} failed)",
        summary.fetched, summary.gone, summary.fetch_failed
    );
    println!("Mapping:    {} failed", summary.mapping_failed);
    println!(
        "Written:    {} ({} failed, {} discarded) in {} batches ({} failed)",
        summary.written,
        summary.load_failed,
        summary.discarded,
        summary.batches_committed,
        summary.batches_failed
    );
    println!("Write rate: {:.1}%", summary.write_rate() * 100.0);
    println!(
        "Throughput: {:.1} records/s",
        rate_per_second(summary.written, Duration::from_millis(summary.duration_ms))
    );
}
