use anyhow::{Context, Result};
use std::path::PathBuf;

use estate_ingest::storage::{RecordStore, SqliteRecordStore};

pub fn stats(database: PathBuf, json: bool) -> Result<()> {
    if !database.exists() {
        println!("Database not found: {}", database.display());
        println!("Run an ingestion first to create the database.");
        return Ok(());
    }

    let store = SqliteRecordStore::new(&database).context("Failed to open database")?;
    let counts = store.counts().context("Failed to count rows")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
        return Ok(());
    }

    println!("Store Statistics");
    println!("================");
    println!("Database: {}", database.display());
    println!();
    println!("Properties: {}", counts.properties);
    for (collection, rows) in &counts.children {
        let per_parent = if counts.properties > 0 {
            *rows as f64 / counts.properties as f64
        } else {
            0.0
        };
        println!("  {:<15} {rows:>8} ({per_parent:.2} per property)", collection.table());
    }

    Ok(())
}
