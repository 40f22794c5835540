//! Primary partition lists
//!
//! A partitions file is JSON: either a top-level array, or an object holding
//! the array under `partitions`, `municipalities_within_60km` or
//! `all_municipalities`. Entries are plain names or objects with a `name` and
//! an optional distance.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::models::PrimaryPartition;

const LIST_KEYS: [&str; 3] = ["partitions", "municipalities_within_60km", "all_municipalities"];

#[derive(Deserialize)]
#[serde(untagged)]
enum Entry {
    Name(String),
    Scope(PrimaryPartition),
}

/// Parse a partitions document
pub fn parse_partitions(document: &Value) -> Result<Vec<PrimaryPartition>> {
    let list = match document {
        Value::Array(_) => document,
        Value::Object(map) => LIST_KEYS
            .iter()
            .find_map(|key| map.get(*key))
            .with_context(|| format!("no partition list found (expected one of {LIST_KEYS:?})"))?,
        _ => anyhow::bail!("partitions document must be an array or an object"),
    };

    let entries: Vec<Entry> =
        serde_json::from_value(list.clone()).context("invalid partition entry")?;

    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            Entry::Name(name) => PrimaryPartition::new(name),
            Entry::Scope(scope) => scope,
        })
        .filter(|p| !p.name.trim().is_empty())
        .collect())
}

/// Read and parse a partitions file
pub fn load_partitions(path: &Path) -> Result<Vec<PrimaryPartition>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read partitions file: {}", path.display()))?;
    let document: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse partitions file: {}", path.display()))?;
    parse_partitions(&document)
}

/// Keep partitions with a known distance of at most `max_km`
///
/// Entries without a distance cannot be verified and are dropped.
pub fn within_distance(partitions: Vec<PrimaryPartition>, max_km: f64) -> Vec<PrimaryPartition> {
    partitions
        .into_iter()
        .filter(|p| match p.distance_km {
            Some(distance) => distance <= max_km,
            None => {
                tracing::warn!(partition = %p.name, "Skipping partition without distance");
                false
            }
        })
        .collect()
}

/// Split a comma-separated list of partition names
pub fn parse_partition_list(raw: &str) -> Vec<PrimaryPartition> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PrimaryPartition::new)
        .collect()
}
