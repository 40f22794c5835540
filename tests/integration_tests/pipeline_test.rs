//! Pipeline integration tests
//!
//! Full runs against the in-memory listing API and a SQLite store on disk.

use super::fixtures::{self, CancelAfter};
use chrono::Utc;
use estate_ingest::config::Config;
use estate_ingest::crawler::{MockListingApi, PipelineBuilder};
use estate_ingest::metrics::SilentReporter;
use estate_ingest::models::{EntityId, PrimaryPartition, RunState};
use estate_ingest::parser::{payload_hash, RecordMapper};
use estate_ingest::storage::{
    create_sqlite_store, Collection, RecordStore, SharedRecordStore,
};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn sqlite_store(dir: &TempDir) -> SharedRecordStore {
    create_sqlite_store(dir.path().join("estate.db")).unwrap()
}

fn builder(config: Config, api: Arc<MockListingApi>, store: SharedRecordStore) -> PipelineBuilder {
    PipelineBuilder::new(config)
        .api(api)
        .store(store)
        .reporter(Arc::new(SilentReporter))
}

fn scope(name: &str) -> Vec<PrimaryPartition> {
    vec![PrimaryPartition::new(name)]
}

// ============================================================================
// Complete Run Tests
// ============================================================================

#[tokio::test]
async fn test_pipeline_full_run_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    let api = Arc::new(fixtures::catalog("lyngby", 23, 3));

    let summary = builder(fixtures::test_config(5, 10), api.clone(), store.clone())
        .build()
        .unwrap()
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.state, Some(RunState::Completed));
    assert_eq!(summary.discovered, 23);
    assert_eq!(summary.work_set, 23);
    assert_eq!(summary.fetched, 23);
    assert_eq!(summary.written, 23);
    assert_eq!(summary.batches_committed, 6);
    assert_eq!(api.detail_calls(), 23);

    let counts = store.counts().unwrap();
    assert_eq!(counts.properties, 23);
    assert_eq!(counts.collection(Collection::Buildings), 46);
    assert_eq!(counts.collection(Collection::Registrations), 23);
    assert_eq!(counts.collection(Collection::Municipality), 23);
}

#[tokio::test]
async fn test_pipeline_rerun_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    let api = Arc::new(fixtures::catalog("lyngby", 10, 2));
    let pipeline = builder(fixtures::test_config(5, 10), api.clone(), store.clone())
        .build()
        .unwrap();

    let first = pipeline
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();
    let counts_after_first = store.counts().unwrap();
    let calls_after_first = api.detail_calls();

    let second = pipeline
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.written, 10);
    assert_eq!(second.skipped_existing, 10);
    assert_eq!(second.work_set, 0);
    assert_eq!(second.written, 0);
    assert_ne!(first.run_id, second.run_id);

    // No detail requests and no row changes on the second run
    assert_eq!(api.detail_calls(), calls_after_first);
    assert_eq!(store.counts().unwrap().properties, counts_after_first.properties);
    assert_eq!(
        store.counts().unwrap().collection(Collection::Buildings),
        counts_after_first.collection(Collection::Buildings)
    );
}

#[tokio::test]
async fn test_pipeline_refresh_replaces_children() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    let config = fixtures::test_config(5, 10);

    let mut wide = fixtures::mock_api();
    fixtures::add_catalog(&mut wide, "lyngby", 4, 1, 3);
    builder(config.clone(), Arc::new(wide), store.clone())
        .build()
        .unwrap()
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();

    let id = EntityId::from("lyngby-00002");
    assert_eq!(store.child_count(&id, Collection::Buildings).unwrap(), 3);

    // Upstream now reports a single building per property
    let mut narrow = fixtures::mock_api();
    fixtures::add_catalog(&mut narrow, "lyngby", 4, 1, 1);
    let summary = builder(config, Arc::new(narrow), store.clone())
        .refresh(true)
        .build()
        .unwrap()
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.skipped_existing, 0);
    assert_eq!(summary.written, 4);
    assert_eq!(store.child_count(&id, Collection::Buildings).unwrap(), 1);
    assert_eq!(store.counts().unwrap().properties, 4);
    assert_eq!(store.counts().unwrap().collection(Collection::Buildings), 4);
}

// ============================================================================
// Per-Record Failure Tests
// ============================================================================

#[tokio::test]
async fn test_pipeline_gone_record_keeps_existing_row() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);

    // A previous run stored Z
    let old_payload = fixtures::detail("Z", 2);
    let old = RecordMapper::default().map(&old_payload, Utc::now()).unwrap();
    store.write_batch(&[old]).unwrap();

    let mut api = fixtures::catalog("lyngby", 3, 1);
    api.add_record(fixtures::hit("Z", "lyngby", "2000"), None);
    api.mark_gone("Z");
    let api = Arc::new(api);

    let summary = builder(fixtures::test_config(5, 10), api.clone(), store.clone())
        .refresh(true)
        .build()
        .unwrap()
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.gone, 1);
    assert_eq!(summary.written, 3);
    assert_eq!(summary.state, Some(RunState::Completed));

    // 404 is never retried
    assert_eq!(api.detail_calls_for("Z"), 1);

    let z = EntityId::from("Z");
    assert_eq!(
        store.payload_hash(&z).unwrap().as_deref(),
        Some(payload_hash(&old_payload).as_str())
    );
    assert_eq!(store.child_count(&z, Collection::Buildings).unwrap(), 2);
}

#[tokio::test]
async fn test_pipeline_gone_record_not_written() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);

    let mut api = fixtures::catalog("lyngby", 2, 1);
    api.add_record(fixtures::hit("Z", "lyngby", "2000"), None);
    api.mark_gone("Z");

    let summary = builder(fixtures::test_config(5, 10), Arc::new(api), store.clone())
        .build()
        .unwrap()
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.gone, 1);
    assert_eq!(summary.written, 2);
    let existing = store.existing_ids(&[EntityId::from("Z")]).unwrap();
    assert!(existing.is_empty());
}

#[tokio::test]
async fn test_pipeline_malformed_payload_isolated() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);

    let mut api = fixtures::catalog("lyngby", 6, 2);
    api.add_record(
        fixtures::hit("broken", "lyngby", "2000"),
        Some(fixtures::malformed_detail("broken")),
    );

    let summary = builder(fixtures::test_config(5, 10), Arc::new(api), store.clone())
        .build()
        .unwrap()
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.fetched, 7);
    assert_eq!(summary.mapping_failed, 1);
    assert_eq!(summary.written, 6);
    assert_eq!(summary.batches_failed, 0);
    assert_eq!(summary.state, Some(RunState::CompletedWithErrors));
    assert!(store
        .existing_ids(&[EntityId::from("broken")])
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_pipeline_transient_failures() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);

    let api = fixtures::catalog("lyngby", 5, 1);
    // Recovers within the retry budget
    api.fail_detail("lyngby-00001", 2);
    // Exhausts it (max_retries = 2 means three attempts)
    api.fail_detail("lyngby-00003", 3);
    let api = Arc::new(api);

    let summary = builder(fixtures::test_config(5, 10), api.clone(), store.clone())
        .build()
        .unwrap()
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.fetched, 4);
    assert_eq!(summary.fetch_failed, 1);
    assert_eq!(summary.written, 4);
    assert_eq!(summary.state, Some(RunState::CompletedWithErrors));
    assert_eq!(api.detail_calls_for("lyngby-00001"), 3);
    assert_eq!(api.detail_calls_for("lyngby-00003"), 3);

    // The failed record is picked up by the next run
    let retry_run = builder(fixtures::test_config(5, 10), api.clone(), store.clone())
        .build()
        .unwrap()
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(retry_run.work_set, 1);
    assert_eq!(retry_run.written, 1);
    assert_eq!(store.counts().unwrap().properties, 5);
}

// ============================================================================
// Run Mode Tests
// ============================================================================

#[tokio::test]
async fn test_pipeline_dry_run_lists_ids() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    let api = Arc::new(fixtures::catalog("lyngby", 9, 3));

    let summary = builder(fixtures::test_config(5, 10), api.clone(), store.clone())
        .dry_run(true)
        .build()
        .unwrap()
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.discovered, 9);
    let ids: HashSet<_> = summary.discovered_ids.iter().map(EntityId::as_str).collect();
    assert_eq!(ids.len(), 9);
    assert!(ids.contains("lyngby-00008"));

    assert_eq!(api.detail_calls(), 0);
    assert_eq!(store.counts().unwrap().properties, 0);
}

#[tokio::test]
async fn test_pipeline_limit_caps_work_set() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    let api = Arc::new(fixtures::catalog("lyngby", 12, 2));

    let summary = builder(fixtures::test_config(5, 10), api.clone(), store.clone())
        .limit(Some(5))
        .build()
        .unwrap()
        .run(&scope("lyngby"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.discovered, 12);
    assert_eq!(summary.work_set, 5);
    assert_eq!(summary.written, 5);
    assert_eq!(api.detail_calls(), 5);
}

#[tokio::test]
async fn test_pipeline_cancel_mid_run() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir);
    let api = Arc::new(fixtures::catalog("lyngby", 40, 4));

    let mut config = fixtures::test_config(5, 10);
    config.ingest.concurrency = 1;

    let cancel = CancellationToken::new();
    let summary = PipelineBuilder::new(config)
        .api(api.clone())
        .store(store.clone())
        .reporter(Arc::new(CancelAfter::new(6, cancel.clone())))
        .build()
        .unwrap()
        .run(&scope("lyngby"), cancel)
        .await
        .unwrap();

    assert_eq!(summary.state, Some(RunState::Cancelled));
    assert!(summary.fetched < 40);
    assert!(api.detail_calls() < 40);

    // Only whole batches reach the store
    let stored = store.counts().unwrap().properties;
    assert_eq!(stored, summary.written);
    assert_eq!(summary.written % 4, 0);
    assert_eq!(summary.written + summary.discarded, summary.fetched);
}
