use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(
    name = "estate-ingest",
    version,
    about = "Partitioned ingestion of property records from a paginated search API",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan, discover, fetch and load records for a set of partitions
    Ingest {
        /// Comma-separated primary partitions (e.g. municipality names)
        #[arg(short, long)]
        partitions: Option<String>,

        /// JSON file listing primary partitions
        #[arg(long)]
        partitions_file: Option<PathBuf>,

        /// Keep only partitions with a known distance within this many km
        #[arg(long)]
        max_distance: Option<f64>,

        /// Maximum detail requests in flight
        #[arg(short = 'w', long)]
        concurrency: Option<usize>,

        /// Maximum requests per second across all stages
        #[arg(short, long)]
        rate: Option<f64>,

        /// Records per write transaction
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// SQLite database path
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Stop after discovery and list the ids
        #[arg(long, default_value = "false")]
        dry_run: bool,

        /// Re-fetch records that are already stored
        #[arg(long, default_value = "false")]
        refresh: bool,

        /// Fetch at most this many records
        #[arg(short, long)]
        limit: Option<usize>,

        /// Exit with an error when any failure was recorded
        #[arg(long, default_value = "false")]
        strict: bool,

        /// Write Prometheus metrics to this file after the run
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },

    /// Load a JSON export of detail payloads without network access
    Import {
        /// Input JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// SQLite database path
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Show row counts of the store
    Stats {
        /// SQLite database path
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Print counts as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    tracing::info!("estate-ingest starting");

    match cli.command {
        Commands::Ingest {
            partitions,
            partitions_file,
            max_distance,
            concurrency,
            rate,
            batch_size,
            database,
            dry_run,
            refresh,
            limit,
            strict,
            metrics_file,
        } => {
            tracing::info!(
                partitions = ?partitions,
                partitions_file = ?partitions_file,
                dry_run = %dry_run,
                refresh = %refresh,
                limit = ?limit,
                "Starting ingest command"
            );
            let params = commands::IngestParams {
                partitions,
                partitions_file,
                max_distance,
                concurrency,
                rate,
                batch_size,
                database,
                dry_run,
                refresh,
                limit,
                strict,
                metrics_file,
            };
            commands::ingest(config, params).await?;
        }

        Commands::Import { input, database } => {
            tracing::info!(input = %input.display(), "Starting import command");
            commands::import(config, input, database).await?;
        }

        Commands::Stats { database, json } => {
            let database = database.unwrap_or_else(|| config.database.sqlite_path.clone());
            commands::stats(database, json)?;
        }
    }

    tracing::info!("estate-ingest completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("estate_ingest=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("estate_ingest={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}
