//! Test fixtures for integration tests
//!
//! Catalog builders for the in-memory listing API and canned detail payloads.

use estate_ingest::config::{Config, SubdivisionKey};
use estate_ingest::crawler::MockListingApi;
use estate_ingest::metrics::{IngestEvent, ProgressReporter};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration matching the mock catalog: fast gate, millisecond backoff
pub fn test_config(per_page: u32, max_pages: u32) -> Config {
    let mut config = Config::default();
    config.api.per_page = per_page;
    config.api.max_pages = max_pages;
    config.api.primary_param = "municipalities".to_string();
    config.api.subdivision_keys = vec![SubdivisionKey::new("zipCodes", "zipCode")];
    config.api.rotate_user_agent = false;
    config.ingest.rate_limit = 100_000.0;
    config.ingest.burst = 1_000;
    config.ingest.batch_size = 4;
    config.ingest.concurrency = 4;
    config.ingest.max_retries = 2;
    config.ingest.base_delay_ms = 1;
    config.ingest.max_delay_ms = 4;
    config.ingest.sample_limit = 200;
    config
}

// ============================================================================
// Payloads
// ============================================================================

/// Detail payload with `buildings` child rows
pub fn detail(id: &str, buildings: usize) -> Value {
    let buildings: Vec<Value> = (0..buildings)
        .map(|i| json!({"buildingName": format!("Bygning {i}"), "totalArea": 100 + i}))
        .collect();

    json!({
        "addressID": id,
        "addressType": "villa",
        "roadName": "Testvej",
        "houseNumber": id,
        "zipCode": 2800,
        "cityName": "Lyngby",
        "buildings": buildings,
        "registrations": [{"registrationID": format!("reg-{id}"), "amount": 2500000, "date": "2020-01-15"}],
        "municipality": {"municipalityCode": 173, "name": "Lyngby-Taarbæk"}
    })
}

/// Detail payload whose collections have the wrong type
pub fn malformed_detail(id: &str) -> Value {
    json!({
        "addressID": id,
        "buildings": {"unexpected": "object"}
    })
}

/// Search hit as the listing API returns it
pub fn hit(id: &str, municipality: &str, zip: &str) -> Value {
    json!({
        "addressID": id,
        "municipality": municipality,
        "zipCode": zip
    })
}

// ============================================================================
// Catalogs
// ============================================================================

/// Empty mock API with municipality and zip code filters
pub fn mock_api() -> MockListingApi {
    MockListingApi::new("addressID")
        .map_param("municipalities", "municipality")
        .map_param("zipCodes", "zipCode")
}

/// Add `count` records to `municipality`, spread round-robin over `zips` zip codes
pub fn add_catalog(
    api: &mut MockListingApi,
    municipality: &str,
    count: usize,
    zips: usize,
    buildings: usize,
) {
    for i in 0..count {
        let id = format!("{municipality}-{i:05}");
        let zip = format!("{}", 2000 + i % zips.max(1));
        api.add_record(hit(&id, municipality, &zip), Some(detail(&id, buildings)));
    }
}

/// Mock API holding one municipality
pub fn catalog(municipality: &str, count: usize, zips: usize) -> MockListingApi {
    let mut api = mock_api();
    add_catalog(&mut api, municipality, count, zips, 2);
    api
}

// ============================================================================
// Reporters
// ============================================================================

/// Cancels a token once a number of records have been fetched
pub struct CancelAfter {
    remaining: AtomicU64,
    token: CancellationToken,
}

impl CancelAfter {
    pub fn new(fetched: u64, token: CancellationToken) -> Self {
        Self {
            remaining: AtomicU64::new(fetched),
            token,
        }
    }
}

impl ProgressReporter for CancelAfter {
    fn report(&self, event: IngestEvent<'_>) {
        if let IngestEvent::RecordFetched { .. } = event {
            if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.token.cancel();
            }
        }
    }
}
