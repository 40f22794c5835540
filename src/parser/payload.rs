//! Typed view of a raw detail payload
//!
//! Every field is optional: absence and `null` both become `None` (or an empty
//! collection). Identifier-like fields accept either strings or numbers.
//! Numeric fields accept numbers or numeric strings, and integer fields also
//! take integral floats; any other value becomes `None`. Collections and
//! nested objects of the wrong JSON type fail deserialization.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::utils::id_from_json;

/// Accept a string or number, normalized to a string
fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v @ (Value::String(_) | Value::Number(_))) => Ok(id_from_json(&v)),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, found {other}"
        ))),
    }
}

fn number_from_json(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Lenient float: numbers or numeric strings, anything else is `None`
fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(number_from_json)
        .filter(|n| n.is_finite()))
}

/// Lenient integer: integers, integral floats (`6.0`) or numeric strings
fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| {
        if let Some(n) = v.as_i64() {
            return Some(n);
        }
        if let Value::String(s) = v {
            if let Ok(n) = s.trim().parse::<i64>() {
                return Some(n);
            }
        }
        number_from_json(v)
            .filter(|n| n.fract() == 0.0 && n.abs() < i64::MAX as f64)
            .map(|n| n as i64)
    }))
}

/// Treat `null` like a missing collection
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertyPayload {
    pub address_type: Option<String>,
    pub road_name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub house_number: Option<String>,
    pub city_name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub zip_code: Option<String>,
    pub place_name: Option<String>,
    pub coordinates: Option<CoordinatesPayload>,
    #[serde(deserialize_with = "opt_f64")]
    pub living_area: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub weighted_area: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub latest_valuation: Option<f64>,
    #[serde(deserialize_with = "opt_string")]
    pub property_number: Option<String>,
    pub is_on_market: Option<bool>,
    pub is_public: Option<bool>,
    pub allow_new_valuation_info: Option<bool>,
    pub energy_label: Option<String>,
    #[serde(rename = "entryAddressID", deserialize_with = "opt_string")]
    pub entry_address_id: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub gstkvhx: Option<String>,
    pub slug: Option<String>,
    pub slug_address: Option<String>,
    #[serde(rename = "_links")]
    pub links: Option<LinksPayload>,
    pub boligsiden_info: Option<BoligsidenInfoPayload>,
    #[serde(deserialize_with = "null_as_empty")]
    pub bfe_numbers: Vec<Value>,
    pub latest_sold_case_description: Option<CaseDescriptionPayload>,
    #[serde(deserialize_with = "null_as_empty")]
    pub buildings: Vec<BuildingPayload>,
    #[serde(deserialize_with = "null_as_empty")]
    pub registrations: Vec<RegistrationPayload>,
    #[serde(deserialize_with = "null_as_empty")]
    pub cases: Vec<CasePayload>,
    pub municipality: Option<MunicipalityPayload>,
    pub province: Option<ProvincePayload>,
    pub road: Option<RoadPayload>,
    pub zip: Option<ZipPayload>,
    pub city: Option<CityPayload>,
    pub place: Option<PlacePayload>,
    pub days_on_market: Option<DaysPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinksPayload {
    #[serde(rename = "self")]
    pub self_link: Option<LinkPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkPayload {
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoligsidenInfoPayload {
    #[serde(deserialize_with = "opt_f64")]
    pub latest_sold_area: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoordinatesPayload {
    #[serde(deserialize_with = "opt_f64")]
    pub lat: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub lon: Option<f64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CaseDescriptionPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildingPayload {
    pub building_name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub building_number: Option<String>,
    #[serde(deserialize_with = "opt_f64")]
    pub housing_area: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub total_area: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub basement_area: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub business_area: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub other_area: Option<f64>,
    #[serde(deserialize_with = "opt_i64")]
    pub number_of_rooms: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub number_of_floors: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub number_of_bathrooms: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub number_of_kitchens: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub number_of_toilets: Option<i64>,
    pub bathroom_condition: Option<String>,
    pub kitchen_condition: Option<String>,
    pub toilet_condition: Option<String>,
    pub external_wall_material: Option<String>,
    pub supplementary_external_wall_material: Option<String>,
    pub roofing_material: Option<String>,
    pub supplementary_roofing_material: Option<String>,
    pub heating_installation: Option<String>,
    pub supplementary_heating: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub asbestos_containing_material: Option<String>,
    #[serde(deserialize_with = "opt_i64")]
    pub year_built: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub year_renovated: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationPayload {
    #[serde(rename = "registrationID", deserialize_with = "opt_string")]
    pub registration_id: Option<String>,
    #[serde(deserialize_with = "opt_f64")]
    pub amount: Option<f64>,
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(deserialize_with = "opt_f64")]
    pub area: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub living_area: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub per_area_price: Option<f64>,
    #[serde(deserialize_with = "opt_i64")]
    pub municipality_code: Option<i64>,
    #[serde(deserialize_with = "opt_string")]
    pub property_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaysPayload {
    #[serde(deserialize_with = "opt_i64")]
    pub days: Option<i64>,
    #[serde(deserialize_with = "null_as_empty")]
    pub realtors: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimeOnMarketPayload {
    pub current: Option<DaysPayload>,
    pub total: Option<DaysPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CasePayload {
    #[serde(rename = "caseID", deserialize_with = "opt_string")]
    pub case_id: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "opt_f64")]
    pub price_cash: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub original_price: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub price_change_percentage: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub per_area_price: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub monthly_expense: Option<f64>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub sold: Option<String>,
    pub time_on_market: Option<TimeOnMarketPayload>,
    #[serde(deserialize_with = "opt_f64")]
    pub lot_area: Option<f64>,
    #[serde(deserialize_with = "opt_i64")]
    pub year_built: Option<i64>,
    pub description_title: Option<String>,
    pub description_body: Option<String>,
    pub case_url: Option<String>,
    #[serde(rename = "providerCaseID", deserialize_with = "opt_string")]
    pub provider_case_id: Option<String>,
    pub has_balcony: Option<bool>,
    pub has_terrace: Option<bool>,
    pub has_elevator: Option<bool>,
    pub highlighted: Option<bool>,
    pub distinction: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub price_changes: Vec<PriceChangePayload>,
    #[serde(deserialize_with = "null_as_empty")]
    pub images: Vec<ImagePayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriceChangePayload {
    pub created: Option<String>,
    #[serde(deserialize_with = "opt_f64")]
    pub old_price: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub new_price: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub price_change: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImagePayload {
    #[serde(deserialize_with = "null_as_empty")]
    pub image_sources: Vec<ImageSourcePayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageSourcePayload {
    pub url: Option<String>,
    pub alt: Option<String>,
    pub size: Option<ImageSizePayload>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ImageSizePayload {
    #[serde(deserialize_with = "opt_i64")]
    pub width: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub height: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MunicipalityPayload {
    #[serde(deserialize_with = "opt_i64")]
    pub municipality_code: Option<i64>,
    pub name: Option<String>,
    pub slug: Option<String>,
    #[serde(deserialize_with = "opt_f64")]
    pub church_tax_percentage: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub council_tax_percentage: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub land_value_tax_level_per_thousand: Option<f64>,
    #[serde(deserialize_with = "opt_i64")]
    pub number_of_schools: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub population: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvincePayload {
    pub name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub province_code: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub region_code: Option<String>,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoadPayload {
    pub name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub road_code: Option<String>,
    #[serde(rename = "roadID", deserialize_with = "opt_string")]
    pub road_id: Option<String>,
    pub slug: Option<String>,
    #[serde(deserialize_with = "opt_i64")]
    pub municipality_code: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZipPayload {
    #[serde(deserialize_with = "opt_string")]
    pub zip_code: Option<String>,
    pub name: Option<String>,
    pub slug: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CityPayload {
    pub name: Option<String>,
    pub slug: Option<String>,
}

/// Named area around the address; `bbox` is `[min_lon, min_lat, max_lon, max_lat]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlacePayload {
    #[serde(deserialize_with = "opt_string")]
    pub id: Option<String>,
    pub name: Option<String>,
    pub slug: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub bbox: Vec<Value>,
    pub coordinates: Option<CoordinatesPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_and_null_fields() {
        let payload: PropertyPayload = serde_json::from_value(json!({
            "roadName": "Strandvejen",
            "buildings": null,
            "municipality": null
        }))
        .unwrap();

        assert_eq!(payload.road_name.as_deref(), Some("Strandvejen"));
        assert!(payload.buildings.is_empty());
        assert!(payload.municipality.is_none());
        assert!(payload.living_area.is_none());
    }

    #[test]
    fn test_string_or_number_ids() {
        let payload: PropertyPayload = serde_json::from_value(json!({
            "zipCode": 2900,
            "houseNumber": "12A",
            "cases": [{"caseID": 77, "providerCaseID": "p-1"}]
        }))
        .unwrap();

        assert_eq!(payload.zip_code.as_deref(), Some("2900"));
        assert_eq!(payload.house_number.as_deref(), Some("12A"));
        assert_eq!(payload.cases[0].case_id.as_deref(), Some("77"));
        assert_eq!(payload.cases[0].provider_case_id.as_deref(), Some("p-1"));
    }

    #[test]
    fn test_lenient_numbers() {
        let payload: PropertyPayload = serde_json::from_value(json!({
            "livingArea": "182.5",
            "buildings": [{
                "numberOfRooms": 6.0,
                "numberOfFloors": "2",
                "yearBuilt": 1934.5,
                "numberOfToilets": {"count": 1}
            }],
            "municipality": {"population": 75000.0, "numberOfSchools": true}
        }))
        .unwrap();

        assert_eq!(payload.living_area, Some(182.5));
        let building = &payload.buildings[0];
        assert_eq!(building.number_of_rooms, Some(6));
        assert_eq!(building.number_of_floors, Some(2));
        assert_eq!(building.year_built, None);
        assert_eq!(building.number_of_toilets, None);

        let municipality = payload.municipality.unwrap();
        assert_eq!(municipality.population, Some(75_000));
        assert_eq!(municipality.number_of_schools, None);
    }

    #[test]
    fn test_location_sections() {
        let payload: PropertyPayload = serde_json::from_value(json!({
            "entryAddressID": 42,
            "_links": {"self": {"href": "/addresses/x"}},
            "road": {"name": "Strandvejen", "roadCode": 1234, "municipalityCode": "157"},
            "place": {"id": 9, "bbox": [12.5, 55.7, 12.6, 55.8]},
            "daysOnMarket": {"realtors": [{"name": "X", "days": 12}]}
        }))
        .unwrap();

        assert_eq!(payload.entry_address_id.as_deref(), Some("42"));
        assert_eq!(
            payload.links.and_then(|l| l.self_link).and_then(|l| l.href).as_deref(),
            Some("/addresses/x")
        );
        let road = payload.road.unwrap();
        assert_eq!(road.road_code.as_deref(), Some("1234"));
        assert_eq!(road.municipality_code, Some(157));
        assert_eq!(payload.place.unwrap().bbox.len(), 4);
        assert_eq!(payload.days_on_market.unwrap().realtors.len(), 1);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let result: Result<PropertyPayload, _> =
            serde_json::from_value(json!({"buildings": "three"}));
        assert!(result.is_err());

        let result: Result<PropertyPayload, _> = serde_json::from_value(json!({"zipCode": [1]}));
        assert!(result.is_err());
    }
}
