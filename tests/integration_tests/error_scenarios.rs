//! Error scenario integration tests
//!
//! Tests various failure modes and error handling:
//! 1. HTTP error responses against a live mock server
//! 2. Fatal planning conditions
//! 3. Store unavailability
//! 4. Request rate bound under concurrency

use estate_ingest::crawler::{HttpListingApi, PipelineBuilder, RequestGate};
use estate_ingest::error::Error;
use estate_ingest::metrics::SilentReporter;
use estate_ingest::models::{PrimaryPartition, RunState};
use estate_ingest::storage::{create_mock_store, create_sqlite_store, MockRecordStore, RecordStore};
use estate_ingest::utils::error::{PlanningError, StoreError};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures;

// ============================================================================
// HTTP Error Tests
// ============================================================================

#[tokio::test]
async fn test_http_run_with_failing_detail() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/addresses"))
        .and(query_param("municipalities", "Gentofte"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalHits": 3,
            "addresses": [
                fixtures::hit("a", "Gentofte", "2900"),
                fixtures::hit("b", "Gentofte", "2900"),
                fixtures::hit("c", "Gentofte", "2820")
            ]
        })))
        .mount(&mock_server)
        .await;

    for id in ["a", "b"] {
        Mock::given(method("GET"))
            .and(path(format!("/addresses/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::detail(id, 1)))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    // Persistent server error: initial attempt plus two retries
    Mock::given(method("GET"))
        .and(path("/addresses/c"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let mut config = fixtures::test_config(50, 200);
    config.api.base_url = mock_server.uri();
    let api = HttpListingApi::new(&config.api).unwrap();
    let store = Arc::new(MockRecordStore::new());

    let summary = PipelineBuilder::new(config)
        .api(Arc::new(api))
        .store(store.clone())
        .reporter(Arc::new(SilentReporter))
        .build()
        .unwrap()
        .run(&[PrimaryPartition::new("Gentofte")], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.fetch_failed, 1);
    assert_eq!(summary.written, 2);
    assert_eq!(summary.state, Some(RunState::CompletedWithErrors));
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_http_gone_record() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/addresses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalHits": 1,
            "addresses": [fixtures::hit("Z", "Gentofte", "2900")]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/addresses/Z"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = fixtures::test_config(50, 200);
    config.api.base_url = mock_server.uri();
    let store = Arc::new(MockRecordStore::new());

    let summary = PipelineBuilder::new(config.clone())
        .api(Arc::new(HttpListingApi::new(&config.api).unwrap()))
        .store(store.clone())
        .reporter(Arc::new(SilentReporter))
        .build()
        .unwrap()
        .run(&[PrimaryPartition::new("Gentofte")], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.gone, 1);
    assert_eq!(summary.written, 0);
    assert_eq!(summary.state, Some(RunState::Completed));
    assert!(store.is_empty());
}

// ============================================================================
// Fatal Condition Tests
// ============================================================================

#[tokio::test]
async fn test_all_partitions_failed_is_fatal() {
    let api = fixtures::catalog("north", 5, 1);
    api.fail_search("municipalities=north", 100);
    api.fail_search("municipalities=south", 100);

    let result = PipelineBuilder::new(fixtures::test_config(5, 10))
        .api(Arc::new(api))
        .store(create_mock_store())
        .reporter(Arc::new(SilentReporter))
        .build()
        .unwrap()
        .run(
            &[PrimaryPartition::new("north"), PrimaryPartition::new("south")],
            CancellationToken::new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(Error::Planning(PlanningError::AllPartitionsFailed { count: 2 }))
    ));
}

#[tokio::test]
async fn test_no_partitions_is_fatal() {
    let result = PipelineBuilder::new(fixtures::test_config(5, 10))
        .api(Arc::new(fixtures::mock_api()))
        .store(create_mock_store())
        .reporter(Arc::new(SilentReporter))
        .build()
        .unwrap()
        .run(&[], CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(Error::Planning(PlanningError::NoPartitions))
    ));
}

#[tokio::test]
async fn test_unavailable_store_is_fatal() {
    let store = Arc::new(MockRecordStore::new());
    let api = Arc::new(fixtures::catalog("north", 6, 1));

    let pipeline = PipelineBuilder::new(fixtures::test_config(5, 10))
        .api(api)
        .store(store.clone())
        .reporter(Arc::new(SilentReporter))
        .build()
        .unwrap();

    store.set_unavailable(true);
    let result = pipeline
        .run(&[PrimaryPartition::new("north")], CancellationToken::new())
        .await;

    match result {
        Err(Error::Store(e)) => assert!(e.is_unavailable()),
        other => panic!("Expected store unavailable, got {other:?}"),
    }
}

#[test]
fn test_unopenable_database_is_unavailable() {
    let dir = TempDir::new().unwrap();
    // A regular file where the parent directory should be
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();

    let result = create_sqlite_store(blocker.join("estate.db"));
    assert!(matches!(result, Err(StoreError::Unavailable(_))));
}

#[test]
fn test_sqlite_store_reopens_with_data() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("estate.db");

    {
        let store = create_sqlite_store(&path).unwrap();
        let record = estate_ingest::parser::RecordMapper::default()
            .map(&fixtures::detail("p-1", 2), chrono::Utc::now())
            .unwrap();
        store.write_batch(&[record]).unwrap();
    }

    let reopened = create_sqlite_store(&path).unwrap();
    assert_eq!(reopened.counts().unwrap().properties, 1);
}

// ============================================================================
// Rate Limiting Tests
// ============================================================================

#[tokio::test]
async fn test_request_rate_bound_with_concurrency() {
    const RATE: f64 = 20.0;

    let api = Arc::new(fixtures::catalog("north", 20, 1));
    let gate = Arc::new(RequestGate::new(RATE, 1).unwrap());

    let mut config = fixtures::test_config(50, 10);
    config.ingest.concurrency = 8;

    let started = Instant::now();
    let summary = PipelineBuilder::new(config)
        .api(api.clone())
        .store(create_mock_store())
        .gate(gate.clone())
        .reporter(Arc::new(SilentReporter))
        .build()
        .unwrap()
        .run(&[PrimaryPartition::new("north")], CancellationToken::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.written, 20);
    // Count query, one page and twenty details
    assert_eq!(summary.requests, 22);
    assert_eq!(gate.granted(), 22);

    // With a burst of one, n requests need at least (n - 1) / R seconds
    let minimum = Duration::from_secs_f64((summary.requests - 1) as f64 / RATE);
    assert!(
        elapsed >= minimum.mul_f64(0.95),
        "{} requests in {elapsed:?}, expected at least {minimum:?}",
        summary.requests
    );
}
