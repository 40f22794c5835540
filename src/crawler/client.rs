//! HTTP client for the listing API
//!
//! [`ListingApi`] is the seam between the pipeline and the remote service.
//! Every call is exactly one HTTP attempt; retry and rate limiting belong to
//! the callers so they apply the same way to any implementation.
//!
//! Features of [`HttpListingApi`]:
//! - Mandatory per-request timeout
//! - User-Agent rotation and browser-like headers
//! - Status classification into transient and terminal [`FetchError`]s
//! - Search responses reduced to ids plus subdivision fields

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, USER_AGENT},
    Client,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::ApiConfig;
use crate::models::{EntityId, SearchHit, SearchPage, SearchQuery};
use crate::utils::error::FetchError;
use crate::utils::id_from_json;

/// Pool of realistic User-Agent strings for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

/// Remote search and detail operations consumed by the pipeline
#[async_trait]
pub trait ListingApi: Send + Sync {
    /// Fetch one page of search results for a partition
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, FetchError>;

    /// Fetch the raw detail payload of one entity
    async fn detail(&self, id: &EntityId) -> Result<Value, FetchError>;
}

/// Thread-safe shared API handle
pub type SharedListingApi = Arc<dyn ListingApi>;

#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    #[serde(rename = "totalHits", alias = "total_hits", default)]
    total_hits: Option<u64>,

    #[serde(alias = "addresses", default)]
    results: Vec<Value>,
}

/// Look up a possibly dotted field (`municipality.name`) in a JSON object
pub fn lookup_field<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    if field.contains('.') {
        value.pointer(&format!("/{}", field.replace('.', "/")))
    } else {
        value.get(field)
    }
}

/// Reduce a search response body to a [`SearchPage`]
///
/// # Errors
///
/// Returns `FetchError::Decode` when the body lacks `totalHits` or is not the
/// expected shape; the total is authoritative and never guessed.
pub fn parse_search_page(
    body: Value,
    id_field: &str,
    hit_fields: &[String],
) -> Result<SearchPage, FetchError> {
    let raw: RawSearchResponse =
        serde_json::from_value(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    let total_hits = raw
        .total_hits
        .ok_or_else(|| FetchError::Decode("search response has no totalHits".to_string()))?;

    let result_count = raw.results.len();
    let hits = raw
        .results
        .iter()
        .filter_map(|result| {
            let id = lookup_field(result, id_field).and_then(id_from_json)?;
            let fields = hit_fields
                .iter()
                .filter_map(|field| {
                    lookup_field(result, field)
                        .and_then(id_from_json)
                        .map(|v| (field.clone(), v))
                })
                .collect();
            Some(SearchHit {
                id: EntityId::new(id),
                fields,
            })
        })
        .collect();

    Ok(SearchPage {
        total_hits,
        hits,
        result_count,
    })
}

/// reqwest-backed listing API client
pub struct HttpListingApi {
    /// HTTP client with configured timeout and compression
    client: Client,

    base_url: String,
    search_path: String,
    detail_path: String,

    /// Query parameters sent with every search
    static_filters: Vec<(String, String)>,

    id_field: String,

    /// Hit fields kept for partition subdivision
    hit_fields: Vec<String>,

    rotate_user_agent: bool,
}

impl HttpListingApi {
    /// Create a client from API configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        Self::with_timeout(
            config,
            Duration::from_secs(config.request_timeout_secs.max(1)),
        )
    }

    /// Create a client with an explicit request timeout
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn with_timeout(config: &ApiConfig, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).gzip(true).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            search_path: config.search_path.clone(),
            detail_path: config.detail_path.trim_end_matches('/').to_string(),
            static_filters: config
                .filters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            id_field: config.id_field.clone(),
            hit_fields: config
                .subdivision_keys
                .iter()
                .map(|k| k.field.clone())
                .collect(),
            rotate_user_agent: config.rotate_user_agent,
        })
    }

    /// Create a client pointed at a different base URL (mock servers in tests)
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn with_base_url(base_url: &str, config: &ApiConfig) -> Result<Self, FetchError> {
        let mut api = Self::new(config)?;
        api.base_url = base_url.trim_end_matches('/').to_string();
        Ok(api)
    }

    /// Build the search URL for one page of a partition
    pub fn search_url(&self, query: &SearchQuery) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, self.search_path))
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.static_filters {
                pairs.append_pair(key, value);
            }
            for filter in query.partition.filters() {
                pairs.append_pair(&filter.param, &filter.value);
            }
            pairs.append_pair("per_page", &query.per_page.to_string());
            pairs.append_pair("page", &query.page.to_string());
        }
        Ok(url)
    }

    /// Build the detail URL of one entity
    pub fn detail_url(&self, id: &EntityId) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, self.detail_path))
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| FetchError::InvalidUrl(self.base_url.clone()))?
            .push(id.as_str());
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, FetchError> {
        tracing::trace!(url = %url, "GET");

        let response = self
            .client
            .get(url)
            .headers(self.build_headers())
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(classify_transport)?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Build HTTP headers for API requests
    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let user_agent = if self.rotate_user_agent {
            self.random_user_agent()
        } else {
            concat!("estate-ingest/", env!("CARGO_PKG_VERSION"))
        };
        headers.insert(USER_AGENT, HeaderValue::from_static(user_agent));

        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("da-DK,da;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

        headers
    }

    /// Get a random user agent from the pool
    fn random_user_agent(&self) -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS.choose(&mut rng).unwrap_or(&USER_AGENTS[0])
    }
}

fn classify_transport(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_decode() {
        FetchError::Decode(e.to_string())
    } else {
        FetchError::Http(e)
    }
}

#[async_trait]
impl ListingApi for HttpListingApi {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, FetchError> {
        let url = self.search_url(query)?;
        let body = self.get_json(url).await?;
        parse_search_page(body, &self.id_field, &self.hit_fields)
    }

    async fn detail(&self, id: &EntityId) -> Result<Value, FetchError> {
        let url = self.detail_url(id)?;
        self.get_json(url).await
    }
}

/// Field values of a hit, keyed by field name
pub fn hit_field<'a>(hit: &'a SearchHit, field: &str) -> Option<&'a str> {
    hit.fields.get(field).map(String::as_str)
}

/// Collect the distinct values of `field` across hits with their frequencies
pub fn field_histogram<'a>(
    hits: impl IntoIterator<Item = &'a SearchHit>,
    field: &str,
) -> (HashMap<String, u64>, u64) {
    let mut counts = HashMap::new();
    let mut missing = 0;
    for hit in hits {
        match hit_field(hit, field) {
            Some(value) => *counts.entry(value.to_string()).or_insert(0) += 1,
            None => missing += 1,
        }
    }
    (counts, missing)
}
