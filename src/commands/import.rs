use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use estate_ingest::config::Config;
use estate_ingest::metrics::TracingReporter;
use estate_ingest::parser::{unwrap_api_payload, RecordMapper};
use estate_ingest::storage::{create_sqlite_store, BatchLoader};

/// Load already-fetched payloads through the mapper and loader, without network access
pub async fn import(config: Config, input: PathBuf, database: Option<PathBuf>) -> Result<()> {
    let db_path = database.unwrap_or_else(|| config.database.sqlite_path.clone());

    println!("Importing payloads");
    println!("==================");
    println!("Input:    {}", input.display());
    println!("Database: {}", db_path.display());

    let content = tokio::fs::read_to_string(&input)
        .await
        .with_context(|| format!("Failed to read input file: {}", input.display()))?;
    let document: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse input file: {}", input.display()))?;

    let entries = match document {
        Value::Array(entries) => entries,
        single @ Value::Object(_) => vec![single],
        _ => anyhow::bail!("Input must be a JSON array of payloads"),
    };

    let store = create_sqlite_store(&db_path).context("Failed to open database")?;
    let mapper = RecordMapper::from_config(&config.api);
    let mut loader = BatchLoader::new(store, config.ingest.batch_size, Arc::new(TracingReporter))
        .with_isolation(config.ingest.isolate_failures);

    let fetched_at = Utc::now();
    let mut mapping_failed = 0u64;

    for (index, entry) in entries.iter().enumerate() {
        match mapper.map(unwrap_api_payload(entry), fetched_at) {
            Ok(record) => loader.push(record).await?,
            Err(e) => {
                mapping_failed += 1;
                tracing::warn!(index, error = %e, "Skipping unmappable payload");
            }
        }
    }
    loader.flush().await?;

    let stats = loader.stats();
    println!("\nImport Summary");
    println!("==============");
    println!("Entries:        {}", entries.len());
    println!("Written:        {}", stats.written);
    println!("Write failures: {}", stats.failed);
    println!("Unmappable:     {mapping_failed}");

    Ok(())
}
