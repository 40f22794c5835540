//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the pipeline stages.

pub mod error;
pub mod retry;

use serde_json::Value;
use std::time::Duration;

/// Normalize an identifier value from JSON into its string form
///
/// APIs are inconsistent about whether ids are strings or numbers; both map to
/// the same string. Empty strings, nulls and other types yield `None`.
pub fn id_from_json(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Format a duration as a compact human-readable string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// Throughput in items per second, zero for an empty interval
pub fn rate_per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return 0.0;
    }
    count as f64 / secs
}
