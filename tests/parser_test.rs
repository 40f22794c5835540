//! Record mapper tests using JSON fixture files

use chrono::{NaiveDate, TimeZone, Utc};
use estate_ingest::parser::{payload_hash, unwrap_api_payload, RecordMapper};
use estate_ingest::storage::{Collection, RecordStore, SqliteRecordStore};
use estate_ingest::utils::error::MappingError;
use serde_json::{json, Value};
use std::fs;

/// Test fixture paths
const FIXTURES_DIR: &str = "tests/fixtures/json";

fn load_fixture(filename: &str) -> Value {
    let path = format!("{FIXTURES_DIR}/{filename}");
    let content =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("Failed to load fixture: {path}"));
    serde_json::from_str(&content).unwrap_or_else(|e| panic!("Invalid fixture {path}: {e}"))
}

fn fetched_at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

// ============================================================================
// Parent Row Tests
// ============================================================================

#[test]
fn test_parent_row_from_fixture() {
    let payload = load_fixture("villa_detail.json");
    let record = RecordMapper::default().map(&payload, fetched_at()).unwrap();
    let parent = &record.parent;

    assert_eq!(parent.id.as_str(), "0a3f50a1-7c1e-4d2b-9b0f-2f6c1f0e9a11");
    assert_eq!(
        parent.address.as_deref(),
        Some("Strandvejen 112, 2900 Hellerup")
    );
    assert_eq!(parent.zip_code.as_deref(), Some("2900"));
    assert_eq!(parent.property_number.as_deref(), Some("157123"));
    assert_eq!(parent.latitude, Some(55.7312));
    assert_eq!(parent.living_area, Some(182.0));
    assert_eq!(parent.is_on_market, Some(true));
    assert_eq!(parent.bfe_numbers.as_deref(), Some("[2093121]"));
    assert_eq!(
        parent.latest_sold_date,
        NaiveDate::from_ymd_opt(2019, 5, 1)
    );
    assert!(parent.place_name.is_none());
    assert_eq!(parent.allow_new_valuation_info, Some(true));
    assert_eq!(
        parent.entry_address_id.as_deref(),
        Some("7d2c11e0-0c3b-4f4e-a1aa-5b0f3e8d0c01")
    );
    assert_eq!(
        parent.api_href.as_deref(),
        Some("/addresses/0a3f50a1-7c1e-4d2b-9b0f-2f6c1f0e9a11")
    );
    assert_eq!(parent.latest_sold_area, Some(182.0));
    assert_eq!(parent.payload_hash, payload_hash(&payload));
    assert_eq!(parent.fetched_at, fetched_at());
}

// ============================================================================
// Child Collection Tests
// ============================================================================

#[test]
fn test_child_rows_from_fixture() {
    let payload = load_fixture("villa_detail.json");
    let record = RecordMapper::default().map(&payload, fetched_at()).unwrap();

    assert_eq!(record.buildings.len(), 2);
    assert!(record.buildings[0].is_main);
    assert!(!record.buildings[1].is_main);
    assert_eq!(record.buildings[0].year_renovated, Some(2008));
    assert_eq!(record.buildings[1].building_number.as_deref(), Some("2"));
    // numeric fields encoded as floats or strings
    assert_eq!(record.buildings[0].rooms, Some(6));
    assert_eq!(record.buildings[0].kitchens, Some(1));
    assert_eq!(record.buildings[0].other_area, Some(12.5));
    assert_eq!(
        record.buildings[0].supplementary_heating.as_deref(),
        Some("Brændeovn")
    );

    assert_eq!(record.registrations.len(), 2);
    assert_eq!(record.registrations[0].registration_id.as_deref(), Some("881234"));
    assert_eq!(record.registrations[1].kind.as_deref(), Some("familie"));
    assert_eq!(record.registrations[0].property_number.as_deref(), Some("157123"));

    assert_eq!(record.cases.len(), 1);
    let case = &record.cases[0];
    assert_eq!(case.provider_case_id.as_deref(), Some("5501"));
    assert_eq!(case.days_on_market_current, Some(42));
    assert_eq!(case.days_on_market_total, Some(77));
    assert!(case.realtors.as_deref().unwrap().contains("Nybolig"));
    assert!(case.modified_at.is_some());
    assert!(case.sold_at.is_none());

    assert_eq!(record.price_changes.len(), 1);
    assert_eq!(record.price_changes[0].price_change, Some(-500_000.0));

    let municipality = record.municipality.as_ref().unwrap();
    assert_eq!(municipality.municipality_code, Some(157));
    assert_eq!(municipality.population, Some(75_000));

    let place = record.place.as_ref().unwrap();
    assert_eq!(place.place_id.as_deref(), Some("c7e4a2f0"));
    assert_eq!(place.bbox_min_lon, Some(12.55));
    assert_eq!(place.bbox_max_lat, Some(55.75));
    assert_eq!(place.coordinate_type.as_deref(), Some("EPSG4326"));
    assert_eq!(record.road.as_ref().unwrap().road_code.as_deref(), Some("1234"));
    assert_eq!(record.zip.as_ref().unwrap().zip_group.as_deref(), Some("2900"));
    assert_eq!(record.province.as_ref().unwrap().region_code.as_deref(), Some("1084"));
    assert!(record
        .days_on_market
        .as_ref()
        .and_then(|d| d.realtors.as_deref())
        .unwrap()
        .contains("Nybolig"));
}

#[test]
fn test_only_configured_image_sizes_are_kept() {
    let payload = load_fixture("villa_detail.json");
    let record = RecordMapper::default().map(&payload, fetched_at()).unwrap();

    // First image has both kept renditions, second only the small one
    assert_eq!(record.case_images.len(), 3);
    assert!(record.case_images.iter().all(|img| img.width != 300));

    let first: Vec<_> = record.case_images.iter().filter(|i| i.position == 0).collect();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|i| i.is_default));
    assert!(first.iter().all(|i| i.alt_text.as_deref() == Some("Facade")));

    let second: Vec<_> = record.case_images.iter().filter(|i| i.position == 1).collect();
    assert_eq!(second.len(), 1);
    assert!(!second[0].is_default);
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[test]
fn test_missing_id_is_rejected() {
    let mut payload = load_fixture("villa_detail.json");
    payload.as_object_mut().unwrap().remove("addressID");

    let result = RecordMapper::default().map(&payload, fetched_at());
    assert!(matches!(result, Err(MappingError::MissingPrimaryKey)));
}

#[test]
fn test_wrong_type_is_malformed() {
    let mut payload = load_fixture("villa_detail.json");
    payload["buildings"] = json!("not a list");

    let result = RecordMapper::default().map(&payload, fetched_at());
    assert!(matches!(result, Err(MappingError::Malformed(_))));
}

#[test]
fn test_null_collections_map_to_empty() {
    let payload = json!({
        "addressID": "sparse-1",
        "buildings": null,
        "cases": null,
        "municipality": null
    });

    let record = RecordMapper::default().map(&payload, fetched_at()).unwrap();
    assert_eq!(record.child_count(), 0);
    assert!(record.parent.address.is_none());
}

// ============================================================================
// Export and Store Tests
// ============================================================================

#[test]
fn test_export_entry_maps_like_raw_payload() {
    let payload = load_fixture("villa_detail.json");
    let entry = json!({"url": "https://example.dk/x", "api": payload.clone()});

    let mapper = RecordMapper::default();
    let from_entry = mapper.map(unwrap_api_payload(&entry), fetched_at()).unwrap();
    let from_raw = mapper.map(&payload, fetched_at()).unwrap();

    assert_eq!(from_entry, from_raw);
}

#[test]
fn test_fixture_persists_all_collections() {
    let payload = load_fixture("villa_detail.json");
    let record = RecordMapper::default().map(&payload, fetched_at()).unwrap();
    let id = record.id().clone();

    let store = SqliteRecordStore::in_memory().unwrap();
    store.write_batch(&[record]).unwrap();

    assert_eq!(store.child_count(&id, Collection::Buildings).unwrap(), 2);
    assert_eq!(store.child_count(&id, Collection::Registrations).unwrap(), 2);
    assert_eq!(store.child_count(&id, Collection::Cases).unwrap(), 1);
    assert_eq!(store.child_count(&id, Collection::PriceChanges).unwrap(), 1);
    assert_eq!(store.child_count(&id, Collection::CaseImages).unwrap(), 3);
    for collection in [
        Collection::Municipality,
        Collection::Province,
        Collection::Road,
        Collection::Zip,
        Collection::City,
        Collection::Place,
        Collection::DaysOnMarket,
    ] {
        assert_eq!(store.child_count(&id, collection).unwrap(), 1, "{collection:?}");
    }
    assert_eq!(
        store.payload_hash(&id).unwrap().as_deref(),
        Some(payload_hash(&payload).as_str())
    );
}
