//! Common test utilities

use serde_json::{json, Value};

/// Detail payload with the given number of buildings
pub fn detail_payload(id: &str, buildings: usize) -> Value {
    let buildings: Vec<Value> = (0..buildings)
        .map(|i| json!({"buildingName": format!("Bygning {i}"), "numberOfRooms": 3 + i}))
        .collect();

    json!({
        "addressID": id,
        "addressType": "villa",
        "roadName": "Strandvejen",
        "houseNumber": "1",
        "zipCode": 2900,
        "cityName": "Hellerup",
        "buildings": buildings,
        "municipality": {"municipalityCode": 157, "name": "Gentofte"}
    })
}
