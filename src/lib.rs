//! estate-ingest - Partitioned ingestion of property records
//!
//! Pulls a large record catalog out of a paginated search API whose result
//! window is capped, and keeps a normalized SQLite store in sync with it across
//! repeated runs.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and partition lists
//! - [`crawler`] - Rate limiting, API access, planning, discovery, fetching and the run pipeline
//! - [`parser`] - Typed payload schema and the record mapper
//! - [`storage`] - Record store, existence filter and batch loader
//! - [`metrics`] - Progress events, tracing output and Prometheus counters
//! - [`models`] - Core data structures and types
//! - [`utils`] - Retry state machine, stage errors and helpers
//!
//! # Example
//!
//! ```no_run
//! use estate_ingest::config::Config;
//! use estate_ingest::crawler::PipelineBuilder;
//! use estate_ingest::models::PrimaryPartition;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let pipeline = PipelineBuilder::new(config).build()?;
//!     let summary = pipeline
//!         .run(&[PrimaryPartition::new("gentofte")], CancellationToken::new())
//!         .await?;
//!     println!("{} records written", summary.written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{IngestPipeline, ListingApi, PipelineBuilder, RequestGate};
    pub use crate::error::{Error, ErrorCategory, IngestErrorTrait, Result};
    pub use crate::metrics::{IngestMetrics, ProgressReporter, TracingReporter};
    pub use crate::models::{EntityId, Partition, PrimaryPartition, RunState, RunSummary};
    pub use crate::parser::{MappedRecord, RecordMapper};
    pub use crate::storage::{RecordStore, SqliteRecordStore};
}

// Direct re-exports for convenience
pub use models::{EntityId, RunState, RunSummary};
