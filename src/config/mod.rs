//! Configuration management for estate-ingest
//!
//! This module handles loading and validating configuration from environment variables,
//! files, and command-line arguments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::utils::retry::RetryConfig;

pub mod partitions;

pub use partitions::{load_partitions, parse_partition_list, parse_partitions, within_distance};

/// Prefix of every environment variable read by [`Config::from_env`]
pub const ENV_PREFIX: &str = "ESTATE_INGEST_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listing API configuration
    pub api: ApiConfig,

    /// Pipeline tuning
    pub ingest: IngestConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// A field of the search results that can narrow an oversized partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubdivisionKey {
    /// Query parameter used to filter by this key
    pub param: String,

    /// Field of a search hit holding the key value
    pub field: String,
}

impl SubdivisionKey {
    pub fn new(param: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            field: field.into(),
        }
    }
}

/// Image rendition kept by the mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Listing API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the API, without trailing slash
    pub base_url: String,

    /// Path of the search endpoint
    pub search_path: String,

    /// Path prefix of the detail endpoint; the id is appended
    pub detail_path: String,

    /// Results per search page
    pub per_page: u32,

    /// Highest page number the API will serve for one query
    pub max_pages: u32,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Field holding the entity id in search hits and detail payloads
    pub id_field: String,

    /// Query parameter of the primary partition scope
    pub primary_param: String,

    /// Ordered keys used to subdivide partitions above the ceiling
    pub subdivision_keys: Vec<SubdivisionKey>,

    /// Static query parameters sent with every search request
    pub filters: BTreeMap<String, String>,

    /// Image renditions to keep
    pub image_sizes: Vec<ImageSize>,

    /// Rotate browser User-Agent strings between requests
    pub rotate_user_agent: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let filters = [
            ("addressTypes", "villa"),
            ("sortBy", "address"),
            ("sortAscending", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            base_url: String::from("https://api.boligsiden.dk"),
            search_path: String::from("/search/addresses"),
            detail_path: String::from("/addresses"),
            per_page: 50,
            max_pages: 200,
            request_timeout_secs: 30,
            id_field: String::from("addressID"),
            primary_param: String::from("municipalities"),
            subdivision_keys: vec![SubdivisionKey::new("zipCodes", "zipCode")],
            filters,
            image_sizes: vec![
                ImageSize {
                    width: 600,
                    height: 400,
                },
                ImageSize {
                    width: 1440,
                    height: 960,
                },
            ],
            rotate_user_agent: true,
        }
    }
}

/// Pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Concurrent detail fetches (W)
    pub concurrency: usize,

    /// Aggregate request ceiling in requests per second (R)
    pub rate_limit: f64,

    /// Requests allowed back-to-back before the rate applies
    pub burst: u32,

    /// Records per committed batch (B)
    pub batch_size: usize,

    /// Retries per request after the first attempt (K)
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    pub base_delay_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_delay_ms: u64,

    /// Search results sampled when looking for subdivision keys
    pub sample_limit: usize,

    /// Page size of count-only queries
    pub count_page_size: u32,

    /// Partitions above `ceiling - safety_margin` are subdivided
    pub safety_margin: u64,

    /// Ids per existence query
    pub existence_chunk_size: usize,

    /// Partitions planned or discovered at the same time
    pub discovery_concurrency: usize,

    /// Channel buffer between fetcher and loader
    pub channel_buffer_size: usize,

    /// Retry a failed batch record by record to isolate offenders
    pub isolate_failures: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: 12,
            rate_limit: 5.0,
            burst: 1,
            batch_size: 50,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            sample_limit: 1000,
            count_page_size: 1,
            safety_margin: 0,
            existence_chunk_size: 1000,
            discovery_concurrency: 4,
            channel_buffer_size: 256,
            isolate_failures: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/estate.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        Ok(Self::default().with_env_overrides())
    }

    /// Apply `ESTATE_INGEST_*` environment variables on top of this configuration
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.api.base_url = env_or("BASE_URL", self.api.base_url);
        self.api.request_timeout_secs = env_or("REQUEST_TIMEOUT", self.api.request_timeout_secs);
        self.api.per_page = env_or("PER_PAGE", self.api.per_page);
        self.api.max_pages = env_or("MAX_PAGES", self.api.max_pages);

        self.ingest.concurrency = env_or("CONCURRENCY", self.ingest.concurrency);
        self.ingest.rate_limit = env_or("RATE_LIMIT", self.ingest.rate_limit);
        self.ingest.batch_size = env_or("BATCH_SIZE", self.ingest.batch_size);
        self.ingest.max_retries = env_or("MAX_RETRIES", self.ingest.max_retries);
        self.ingest.sample_limit = env_or("SAMPLE_LIMIT", self.ingest.sample_limit);

        self.database.sqlite_path = env_or("SQLITE_PATH", self.database.sqlite_path);

        self.logging.level = env_or("LOG_LEVEL", self.logging.level);
        self.logging.format = env_or("LOG_FORMAT", self.logging.format);
        self
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.api.per_page == 0 || self.api.max_pages == 0 {
            anyhow::bail!("per_page and max_pages must be greater than 0");
        }

        if self.api.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.api.id_field.is_empty() || self.api.primary_param.is_empty() {
            anyhow::bail!("id_field and primary_param must not be empty");
        }

        if self.ingest.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if !self.ingest.rate_limit.is_finite() || self.ingest.rate_limit <= 0.0 {
            anyhow::bail!("rate_limit must be positive");
        }

        if self.ingest.burst == 0 {
            anyhow::bail!("burst must be greater than 0");
        }

        if self.ingest.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.ingest.existence_chunk_size == 0 {
            anyhow::bail!("existence_chunk_size must be greater than 0");
        }

        if self.ingest.discovery_concurrency == 0 || self.ingest.channel_buffer_size == 0 {
            anyhow::bail!("discovery_concurrency and channel_buffer_size must be greater than 0");
        }

        if self.ingest.count_page_size == 0 {
            anyhow::bail!("count_page_size must be greater than 0");
        }

        if self.ingest.safety_margin >= self.ceiling() {
            anyhow::bail!(
                "safety_margin ({}) must be below the ceiling ({})",
                self.ingest.safety_margin,
                self.ceiling()
            );
        }

        Ok(())
    }

    /// Maximum results retrievable from one query (C)
    #[must_use]
    pub fn ceiling(&self) -> u64 {
        u64::from(self.api.per_page) * u64::from(self.api.max_pages)
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    /// Retry policy shared by every request stage
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.ingest.max_retries,
            base_delay_ms: self.ingest.base_delay_ms,
            max_delay_ms: self.ingest.max_delay_ms,
            ..RetryConfig::default()
        }
    }
}
