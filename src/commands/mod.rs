pub mod import;
pub mod ingest;
pub mod stats;

// Re-export command functions for convenience
pub use import::import;
pub use ingest::{ingest, IngestParams};
pub use stats::stats;

use anyhow::Result;
use std::path::Path;

use estate_ingest::config::Config;

/// Load the config file if given, otherwise defaults plus environment
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?.with_env_overrides(),
        None => Config::from_env()?,
    };
    Ok(config)
}
