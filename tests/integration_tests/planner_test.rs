//! Partition planning and discovery tests
//!
//! Catalogs larger than the result ceiling must still be discovered completely
//! once they are split into reachable partitions.

use super::fixtures;
use estate_ingest::crawler::{IdDiscovery, PartitionPlanner, PipelineBuilder, RequestGate};
use estate_ingest::crawler::planner::PlannerSettings;
use estate_ingest::metrics::SilentReporter;
use estate_ingest::models::{PrimaryPartition, RunState};
use estate_ingest::storage::create_mock_store;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Ceiling Tests
// ============================================================================

/// 14,368 records behind a 10,000 result ceiling, twelve zip codes
#[tokio::test]
async fn test_catalog_above_ceiling_is_fully_discovered() {
    let config = fixtures::test_config(50, 200);
    assert_eq!(config.ceiling(), 10_000);

    let api = Arc::new(fixtures::catalog("københavn", 14_368, 12));
    let gate = Arc::new(RequestGate::new(100_000.0, 1_000).unwrap());

    let planner = PartitionPlanner::new(
        api.clone(),
        gate.clone(),
        config.retry_config(),
        PlannerSettings::from_config(&config),
        Arc::new(SilentReporter),
    );
    let plan = planner
        .plan(&[PrimaryPartition::new("københavn")])
        .await
        .unwrap();

    assert_eq!(plan.finals.len(), 12);
    assert_eq!(plan.irreducible_count(), 0);
    assert_eq!(plan.mismatches, 0);
    assert_eq!(plan.expected_total(), 14_368);
    assert!(plan.finals.iter().all(|f| f.total_hits <= 10_000));
    assert!(plan.finals.iter().all(|f| f.partition.depth() == 1));

    let discovery = IdDiscovery::new(api, gate, config.retry_config(), Arc::new(SilentReporter))
        .with_paging(config.api.per_page, config.api.max_pages)
        .with_concurrency(4);
    let result = discovery.discover_all(&plan, &CancellationToken::new()).await;

    let unique: HashSet<_> = result.ids.iter().collect();
    assert_eq!(result.ids.len(), 14_368);
    assert_eq!(unique.len(), 14_368);
    assert_eq!(result.duplicates, 0);
    assert_eq!(result.incomplete_count(), 0);
}

#[tokio::test]
async fn test_irreducible_partition_is_reported() {
    // Ceiling of 50 and every record in one zip code
    let mut api = fixtures::mock_api();
    fixtures::add_catalog(&mut api, "gentofte", 120, 1, 0);

    let summary = PipelineBuilder::new(fixtures::test_config(5, 10))
        .api(Arc::new(api))
        .store(create_mock_store())
        .reporter(Arc::new(SilentReporter))
        .dry_run(true)
        .build()
        .unwrap()
        .run(&[PrimaryPartition::new("gentofte")], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.partitions_irreducible, 1);
    assert_eq!(summary.partitions_incomplete, 1);
    assert_eq!(summary.discovered, 50);
    assert_eq!(summary.state, Some(RunState::CompletedWithErrors));
}

#[tokio::test]
async fn test_small_partition_is_not_subdivided() {
    let api = Arc::new(fixtures::catalog("dragør", 30, 5));
    let before = api.search_calls();

    let summary = PipelineBuilder::new(fixtures::test_config(5, 10))
        .api(api.clone())
        .store(create_mock_store())
        .reporter(Arc::new(SilentReporter))
        .dry_run(true)
        .build()
        .unwrap()
        .run(&[PrimaryPartition::new("dragør")], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.partitions_final, 1);
    assert_eq!(summary.discovered, 30);
    // One count query, six full pages and the empty page ending pagination
    assert_eq!(api.search_calls() - before, 8);
}

// ============================================================================
// Multi-Partition Tests
// ============================================================================

#[tokio::test]
async fn test_ids_in_several_partitions_are_merged() {
    let mut api = fixtures::mock_api();
    fixtures::add_catalog(&mut api, "north", 8, 2, 1);
    fixtures::add_catalog(&mut api, "south", 6, 2, 1);
    // A border address listed under both municipalities
    api.add_record(
        fixtures::hit("border-1", "north", "2000"),
        Some(fixtures::detail("border-1", 1)),
    );
    api.add_record(fixtures::hit("border-1", "south", "2000"), None);
    let api = Arc::new(api);

    let store = create_mock_store();
    let summary = PipelineBuilder::new(fixtures::test_config(5, 10))
        .api(api.clone())
        .store(store.clone())
        .reporter(Arc::new(SilentReporter))
        .build()
        .unwrap()
        .run(
            &[PrimaryPartition::new("north"), PrimaryPartition::new("south")],
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.discovered, 15);
    assert_eq!(summary.duplicate_ids, 1);
    assert_eq!(summary.written, 15);
    assert_eq!(api.detail_calls_for("border-1"), 1);
    assert_eq!(store.counts().unwrap().properties, 15);
}

#[tokio::test]
async fn test_failed_partition_does_not_stop_run() {
    let mut api = fixtures::mock_api();
    fixtures::add_catalog(&mut api, "north", 5, 1, 1);
    fixtures::add_catalog(&mut api, "south", 5, 1, 1);
    api.fail_search("municipalities=south", 100);

    let summary = PipelineBuilder::new(fixtures::test_config(5, 10))
        .api(Arc::new(api))
        .store(create_mock_store())
        .reporter(Arc::new(SilentReporter))
        .build()
        .unwrap()
        .run(
            &[PrimaryPartition::new("north"), PrimaryPartition::new("south")],
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.partitions_failed, 1);
    assert_eq!(
        summary.failed_partitions,
        vec!["municipalities=south".to_string()]
    );
    assert_eq!(summary.written, 5);
    assert_eq!(summary.state, Some(RunState::CompletedWithErrors));
}
