//! Mapping of detail payloads to relational rows

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::{ApiConfig, ImageSize};
use crate::models::EntityId;
use crate::parser::payload::{CasePayload, ImagePayload, PlacePayload, PropertyPayload};
use crate::utils::error::MappingError;
use crate::utils::id_from_json;

/// Parent row, one per entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRow {
    pub id: EntityId,
    pub address: Option<String>,
    pub address_type: Option<String>,
    pub road_name: Option<String>,
    pub house_number: Option<String>,
    pub zip_code: Option<String>,
    pub city_name: Option<String>,
    pub place_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub coordinate_type: Option<String>,
    pub living_area: Option<f64>,
    pub weighted_area: Option<f64>,
    pub latest_valuation: Option<f64>,
    pub property_number: Option<String>,
    pub is_on_market: Option<bool>,
    pub is_public: Option<bool>,
    pub allow_new_valuation_info: Option<bool>,
    pub energy_label: Option<String>,
    pub entry_address_id: Option<String>,
    pub gstkvhx: Option<String>,
    pub slug: Option<String>,
    pub slug_address: Option<String>,
    /// `_links.self.href` of the detail resource
    pub api_href: Option<String>,
    /// JSON array text
    pub bfe_numbers: Option<String>,
    pub latest_sold_title: Option<String>,
    pub latest_sold_body: Option<String>,
    pub latest_sold_date: Option<NaiveDate>,
    pub latest_sold_area: Option<f64>,
    /// SHA-256 of the canonical payload JSON
    pub payload_hash: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingRow {
    pub property_id: EntityId,
    pub position: u32,
    pub is_main: bool,
    pub building_name: Option<String>,
    pub building_number: Option<String>,
    pub housing_area: Option<f64>,
    pub total_area: Option<f64>,
    pub basement_area: Option<f64>,
    pub business_area: Option<f64>,
    pub other_area: Option<f64>,
    pub rooms: Option<i64>,
    pub floors: Option<i64>,
    pub bathrooms: Option<i64>,
    pub kitchens: Option<i64>,
    pub toilets: Option<i64>,
    pub bathroom_condition: Option<String>,
    pub kitchen_condition: Option<String>,
    pub toilet_condition: Option<String>,
    pub external_wall_material: Option<String>,
    pub supplementary_external_wall_material: Option<String>,
    pub roofing_material: Option<String>,
    pub supplementary_roofing_material: Option<String>,
    pub heating_installation: Option<String>,
    pub supplementary_heating: Option<String>,
    pub asbestos_containing_material: Option<String>,
    pub year_built: Option<i64>,
    pub year_renovated: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRow {
    pub property_id: EntityId,
    pub position: u32,
    pub registration_id: Option<String>,
    pub amount: Option<f64>,
    pub date: Option<NaiveDate>,
    pub kind: Option<String>,
    pub area: Option<f64>,
    pub living_area: Option<f64>,
    pub per_area_price: Option<f64>,
    pub municipality_code: Option<i64>,
    pub property_number: Option<String>,
}

/// One listing episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRow {
    pub property_id: EntityId,
    pub position: u32,
    pub case_id: Option<String>,
    pub status: Option<String>,
    pub price_cash: Option<f64>,
    pub original_price: Option<f64>,
    pub price_change_percentage: Option<f64>,
    pub per_area_price: Option<f64>,
    pub monthly_expense: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub sold_at: Option<DateTime<Utc>>,
    pub days_on_market_current: Option<i64>,
    pub days_on_market_total: Option<i64>,
    /// JSON array text
    pub realtors: Option<String>,
    pub lot_area: Option<f64>,
    pub year_built: Option<i64>,
    pub description_title: Option<String>,
    pub description_body: Option<String>,
    pub case_url: Option<String>,
    pub provider_case_id: Option<String>,
    pub has_balcony: Option<bool>,
    pub has_terrace: Option<bool>,
    pub has_elevator: Option<bool>,
    pub highlighted: Option<bool>,
    pub distinction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChangeRow {
    pub property_id: EntityId,
    pub case_position: u32,
    pub position: u32,
    pub changed_at: Option<DateTime<Utc>>,
    pub old_price: Option<f64>,
    pub new_price: Option<f64>,
    pub price_change: Option<f64>,
}

/// One kept rendition of one case image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseImageRow {
    pub property_id: EntityId,
    pub case_position: u32,
    /// Index of the image within its case
    pub position: u32,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub is_default: bool,
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MunicipalityRow {
    pub property_id: EntityId,
    pub municipality_code: Option<i64>,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub church_tax_percentage: Option<f64>,
    pub council_tax_percentage: Option<f64>,
    pub land_value_tax_level_per_thousand: Option<f64>,
    pub number_of_schools: Option<i64>,
    pub population: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvinceRow {
    pub property_id: EntityId,
    pub name: Option<String>,
    pub province_code: Option<String>,
    pub region_code: Option<String>,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadRow {
    pub property_id: EntityId,
    pub name: Option<String>,
    pub road_code: Option<String>,
    pub road_id: Option<String>,
    pub slug: Option<String>,
    pub municipality_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZipRow {
    pub property_id: EntityId,
    pub zip_code: Option<String>,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub zip_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRow {
    pub property_id: EntityId,
    pub name: Option<String>,
    pub slug: Option<String>,
}

/// Named area; the bounding box needs all four corners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRow {
    pub property_id: EntityId,
    pub place_id: Option<String>,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub bbox_min_lon: Option<f64>,
    pub bbox_min_lat: Option<f64>,
    pub bbox_max_lon: Option<f64>,
    pub bbox_max_lat: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub coordinate_type: Option<String>,
}

/// Property-level time on market across realtors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaysOnMarketRow {
    pub property_id: EntityId,
    pub days: Option<i64>,
    /// JSON array text
    pub realtors: Option<String>,
}

/// Parent row plus every child collection of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRecord {
    pub parent: PropertyRow,
    pub buildings: Vec<BuildingRow>,
    pub registrations: Vec<RegistrationRow>,
    pub cases: Vec<CaseRow>,
    pub price_changes: Vec<PriceChangeRow>,
    pub case_images: Vec<CaseImageRow>,
    pub municipality: Option<MunicipalityRow>,
    pub province: Option<ProvinceRow>,
    pub road: Option<RoadRow>,
    pub zip: Option<ZipRow>,
    pub city: Option<CityRow>,
    pub place: Option<PlaceRow>,
    pub days_on_market: Option<DaysOnMarketRow>,
}

impl MappedRecord {
    pub fn id(&self) -> &EntityId {
        &self.parent.id
    }

    /// Number of child rows across all collections
    pub fn child_count(&self) -> usize {
        self.buildings.len()
            + self.registrations.len()
            + self.cases.len()
            + self.price_changes.len()
            + self.case_images.len()
            + usize::from(self.municipality.is_some())
            + usize::from(self.province.is_some())
            + usize::from(self.road.is_some())
            + usize::from(self.zip.is_some())
            + usize::from(self.city.is_some())
            + usize::from(self.place.is_some())
            + usize::from(self.days_on_market.is_some())
    }
}

/// Calendar date from `YYYY-MM-DD` or a timestamp; `None` when unparseable
pub fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(Some(raw)).map(|ts| ts.date_naive()))
}

/// UTC timestamp from RFC 3339, a naive ISO timestamp or a bare date
pub fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// SHA-256 of the payload's canonical JSON (object keys sorted)
pub fn payload_hash(payload: &Value) -> String {
    let canonical = payload.to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The detail payload inside an export entry
///
/// Exports wrap each payload as `{ "api": payload, ... }`; anything else is
/// taken to be the payload itself.
pub fn unwrap_api_payload(entry: &Value) -> &Value {
    match entry.get("api") {
        Some(inner) if inner.is_object() => inner,
        _ => entry,
    }
}

fn json_array_text(values: &[Value]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(Value::Array(values.to_vec()).to_string())
    }
}

fn join_present(parts: &[Option<&str>], separator: &str) -> Option<String> {
    let present: Vec<&str> = parts
        .iter()
        .flatten()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    (!present.is_empty()).then(|| present.join(separator))
}

/// Pure transform from raw detail payload to [`MappedRecord`]
#[derive(Debug, Clone)]
pub struct RecordMapper {
    id_field: String,
    image_sizes: Vec<ImageSize>,
}

impl Default for RecordMapper {
    fn default() -> Self {
        Self::from_config(&ApiConfig::default())
    }
}

impl RecordMapper {
    pub fn new(id_field: impl Into<String>, image_sizes: Vec<ImageSize>) -> Self {
        Self {
            id_field: id_field.into(),
            image_sizes,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(config.id_field.clone(), config.image_sizes.clone())
    }

    /// Map one payload
    ///
    /// # Errors
    ///
    /// `MappingError::Malformed` when the payload is not an object or a
    /// collection or nested object has the wrong type;
    /// `MappingError::MissingPrimaryKey` when the id field is absent or empty.
    pub fn map(&self, payload: &Value, fetched_at: DateTime<Utc>) -> Result<MappedRecord, MappingError> {
        if !payload.is_object() {
            return Err(MappingError::Malformed("payload is not a JSON object".to_string()));
        }

        let id = payload
            .get(&self.id_field)
            .and_then(id_from_json)
            .map(EntityId::new)
            .ok_or(MappingError::MissingPrimaryKey)?;

        let typed = PropertyPayload::deserialize(payload)
            .map_err(|e| MappingError::Malformed(e.to_string()))?;

        let parent = Self::parent_row(&id, &typed, payload_hash(payload), fetched_at);

        let buildings = typed
            .buildings
            .iter()
            .enumerate()
            .map(|(position, b)| BuildingRow {
                property_id: id.clone(),
                position: position as u32,
                is_main: position == 0,
                building_name: b.building_name.clone(),
                building_number: b.building_number.clone(),
                housing_area: b.housing_area,
                total_area: b.total_area,
                basement_area: b.basement_area,
                business_area: b.business_area,
                other_area: b.other_area,
                rooms: b.number_of_rooms,
                floors: b.number_of_floors,
                bathrooms: b.number_of_bathrooms,
                kitchens: b.number_of_kitchens,
                toilets: b.number_of_toilets,
                bathroom_condition: b.bathroom_condition.clone(),
                kitchen_condition: b.kitchen_condition.clone(),
                toilet_condition: b.toilet_condition.clone(),
                external_wall_material: b.external_wall_material.clone(),
                supplementary_external_wall_material: b
                    .supplementary_external_wall_material
                    .clone(),
                roofing_material: b.roofing_material.clone(),
                supplementary_roofing_material: b.supplementary_roofing_material.clone(),
                heating_installation: b.heating_installation.clone(),
                supplementary_heating: b.supplementary_heating.clone(),
                asbestos_containing_material: b.asbestos_containing_material.clone(),
                year_built: b.year_built,
                year_renovated: b.year_renovated,
            })
            .collect();

        let registrations = typed
            .registrations
            .iter()
            .enumerate()
            .map(|(position, r)| RegistrationRow {
                property_id: id.clone(),
                position: position as u32,
                registration_id: r.registration_id.clone(),
                amount: r.amount,
                date: parse_date(r.date.as_deref()),
                kind: r.kind.clone(),
                area: r.area,
                living_area: r.living_area,
                per_area_price: r.per_area_price,
                municipality_code: r.municipality_code,
                property_number: r.property_number.clone(),
            })
            .collect();

        let mut cases = Vec::with_capacity(typed.cases.len());
        let mut price_changes = Vec::new();
        let mut case_images = Vec::new();
        for (position, case) in typed.cases.iter().enumerate() {
            let position = position as u32;
            cases.push(Self::case_row(&id, position, case));

            price_changes.extend(case.price_changes.iter().enumerate().map(|(idx, pc)| {
                PriceChangeRow {
                    property_id: id.clone(),
                    case_position: position,
                    position: idx as u32,
                    changed_at: parse_timestamp(pc.created.as_deref()),
                    old_price: pc.old_price,
                    new_price: pc.new_price,
                    price_change: pc.price_change,
                }
            }));

            for (idx, image) in case.images.iter().enumerate() {
                case_images.extend(self.image_rows(&id, position, idx as u32, image));
            }
        }

        let municipality = typed.municipality.as_ref().map(|m| MunicipalityRow {
            property_id: id.clone(),
            municipality_code: m.municipality_code,
            name: m.name.clone(),
            slug: m.slug.clone(),
            church_tax_percentage: m.church_tax_percentage,
            council_tax_percentage: m.council_tax_percentage,
            land_value_tax_level_per_thousand: m.land_value_tax_level_per_thousand,
            number_of_schools: m.number_of_schools,
            population: m.population,
        });

        let province = typed.province.as_ref().map(|p| ProvinceRow {
            property_id: id.clone(),
            name: p.name.clone(),
            province_code: p.province_code.clone(),
            region_code: p.region_code.clone(),
            slug: p.slug.clone(),
        });

        let road = typed.road.as_ref().map(|r| RoadRow {
            property_id: id.clone(),
            name: r.name.clone(),
            road_code: r.road_code.clone(),
            road_id: r.road_id.clone(),
            slug: r.slug.clone(),
            municipality_code: r.municipality_code,
        });

        let zip = typed.zip.as_ref().map(|z| ZipRow {
            property_id: id.clone(),
            zip_code: z.zip_code.clone(),
            name: z.name.clone(),
            slug: z.slug.clone(),
            zip_group: z.group.clone(),
        });

        let city = typed.city.as_ref().map(|c| CityRow {
            property_id: id.clone(),
            name: c.name.clone(),
            slug: c.slug.clone(),
        });

        let place = typed.place.as_ref().map(|p| Self::place_row(&id, p));

        let days_on_market = typed.days_on_market.as_ref().map(|d| DaysOnMarketRow {
            property_id: id.clone(),
            days: d.days,
            realtors: json_array_text(&d.realtors),
        });

        Ok(MappedRecord {
            parent,
            buildings,
            registrations,
            cases,
            price_changes,
            case_images,
            municipality,
            province,
            road,
            zip,
            city,
            place,
            days_on_market,
        })
    }

    fn parent_row(
        id: &EntityId,
        p: &PropertyPayload,
        payload_hash: String,
        fetched_at: DateTime<Utc>,
    ) -> PropertyRow {
        let street = join_present(&[p.road_name.as_deref(), p.house_number.as_deref()], " ");
        let locality = join_present(&[p.zip_code.as_deref(), p.city_name.as_deref()], " ");
        let address = join_present(&[street.as_deref(), locality.as_deref()], ", ");
        let coordinates = p.coordinates.as_ref();
        let sold = p.latest_sold_case_description.as_ref();

        PropertyRow {
            id: id.clone(),
            address,
            address_type: p.address_type.clone(),
            road_name: p.road_name.clone(),
            house_number: p.house_number.clone(),
            zip_code: p.zip_code.clone(),
            city_name: p.city_name.clone(),
            place_name: p.place_name.clone(),
            latitude: coordinates.and_then(|c| c.lat),
            longitude: coordinates.and_then(|c| c.lon),
            coordinate_type: coordinates.and_then(|c| c.kind.clone()),
            living_area: p.living_area,
            weighted_area: p.weighted_area,
            latest_valuation: p.latest_valuation,
            property_number: p.property_number.clone(),
            is_on_market: p.is_on_market,
            is_public: p.is_public,
            allow_new_valuation_info: p.allow_new_valuation_info,
            energy_label: p.energy_label.clone(),
            entry_address_id: p.entry_address_id.clone(),
            gstkvhx: p.gstkvhx.clone(),
            slug: p.slug.clone(),
            slug_address: p.slug_address.clone(),
            api_href: p
                .links
                .as_ref()
                .and_then(|l| l.self_link.as_ref())
                .and_then(|l| l.href.clone()),
            bfe_numbers: json_array_text(&p.bfe_numbers),
            latest_sold_title: sold.and_then(|s| s.title.clone()),
            latest_sold_body: sold.and_then(|s| s.body.clone()),
            latest_sold_date: sold.and_then(|s| parse_date(s.date.as_deref())),
            latest_sold_area: p.boligsiden_info.as_ref().and_then(|b| b.latest_sold_area),
            payload_hash,
            fetched_at,
        }
    }

    fn place_row(id: &EntityId, p: &PlacePayload) -> PlaceRow {
        let corner = |i: usize| {
            p.bbox
                .get(i)
                .filter(|_| p.bbox.len() >= 4)
                .and_then(Value::as_f64)
        };
        let coordinates = p.coordinates.as_ref();

        PlaceRow {
            property_id: id.clone(),
            place_id: p.id.clone(),
            name: p.name.clone(),
            slug: p.slug.clone(),
            bbox_min_lon: corner(0),
            bbox_min_lat: corner(1),
            bbox_max_lon: corner(2),
            bbox_max_lat: corner(3),
            latitude: coordinates.and_then(|c| c.lat),
            longitude: coordinates.and_then(|c| c.lon),
            coordinate_type: coordinates.and_then(|c| c.kind.clone()),
        }
    }

    fn case_row(id: &EntityId, position: u32, c: &CasePayload) -> CaseRow {
        let time_on_market = c.time_on_market.as_ref();
        let current = time_on_market.and_then(|t| t.current.as_ref());
        let total = time_on_market.and_then(|t| t.total.as_ref());

        CaseRow {
            property_id: id.clone(),
            position,
            case_id: c.case_id.clone(),
            status: c.status.clone(),
            price_cash: c.price_cash,
            original_price: c.original_price,
            price_change_percentage: c.price_change_percentage,
            per_area_price: c.per_area_price,
            monthly_expense: c.monthly_expense,
            created_at: parse_timestamp(c.created.as_deref()),
            modified_at: parse_timestamp(c.modified.as_deref()),
            sold_at: parse_timestamp(c.sold.as_deref()),
            days_on_market_current: current.and_then(|d| d.days),
            days_on_market_total: total.and_then(|d| d.days),
            realtors: total.and_then(|d| json_array_text(&d.realtors)),
            lot_area: c.lot_area,
            year_built: c.year_built,
            description_title: c.description_title.clone(),
            description_body: c.description_body.clone(),
            case_url: c.case_url.clone(),
            provider_case_id: c.provider_case_id.clone(),
            has_balcony: c.has_balcony,
            has_terrace: c.has_terrace,
            has_elevator: c.has_elevator,
            highlighted: c.highlighted,
            distinction: c.distinction.clone(),
        }
    }

    /// Rows for the kept renditions of one image; alt text comes from the
    /// first source that has one
    fn image_rows(
        &self,
        id: &EntityId,
        case_position: u32,
        position: u32,
        image: &ImagePayload,
    ) -> Vec<CaseImageRow> {
        let alt_text = image
            .image_sources
            .iter()
            .find_map(|s| s.alt.clone().filter(|a| !a.is_empty()));

        self.image_sizes
            .iter()
            .filter_map(|wanted| {
                image.image_sources.iter().find_map(|source| {
                    let size = source.size?;
                    if size.width == Some(i64::from(wanted.width))
                        && size.height == Some(i64::from(wanted.height))
                    {
                        source.url.clone().map(|url| CaseImageRow {
                            property_id: id.clone(),
                            case_position,
                            position,
                            url,
                            width: wanted.width,
                            height: wanted.height,
                            is_default: position == 0,
                            alt_text: alt_text.clone(),
                        })
                    } else {
                        None
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_payload() -> Value {
        json!({
            "addressID": "0a3f50a1-aaaa",
            "addressType": "villa",
            "roadName": "Strandvejen",
            "houseNumber": "12",
            "zipCode": 2900,
            "cityName": "Hellerup",
            "coordinates": {"lat": 55.73, "lon": 12.58, "type": "EPSG4326"},
            "livingArea": 182.0,
            "isOnMarket": true,
            "bfeNumbers": [1234567],
            "latestSoldCaseDescription": {"title": "Villa", "date": "2019-05-01"},
            "buildings": [
                {"buildingName": "Fritliggende enfamiliehus", "numberOfRooms": 6, "yearBuilt": 1934},
                {"buildingName": "Carport"}
            ],
            "registrations": [
                {"registrationID": "r1", "amount": 4500000, "date": "2019-05-01", "type": "normal"}
            ],
            "cases": [{
                "caseID": "c1",
                "status": "open",
                "priceCash": 12500000,
                "created": "2024-01-15T10:30:00Z",
                "sold": "not a date",
                "timeOnMarket": {"current": {"days": 12}, "total": {"days": 40, "realtors": [{"name": "X"}]}},
                "priceChanges": [
                    {"created": "2024-02-01T00:00:00Z", "oldPrice": 13000000, "newPrice": 12500000, "priceChange": -500000}
                ],
                "images": [
                    {"imageSources": [
                        {"url": "https://img/1-small", "alt": "Facade", "size": {"width": 600, "height": 400}},
                        {"url": "https://img/1-large", "size": {"width": 1440, "height": 960}},
                        {"url": "https://img/1-other", "size": {"width": 300, "height": 200}}
                    ]},
                    {"imageSources": [
                        {"url": "https://img/2-large", "size": {"width": 1440, "height": 960}}
                    ]}
                ]
            }],
            "municipality": {"municipalityCode": 157, "name": "Gentofte", "population": 75000}
        })
    }

    #[test]
    fn test_map_full_payload() {
        let record = RecordMapper::default().map(&full_payload(), Utc::now()).unwrap();

        assert_eq!(record.id().as_str(), "0a3f50a1-aaaa");
        assert_eq!(
            record.parent.address.as_deref(),
            Some("Strandvejen 12, 2900 Hellerup")
        );
        assert_eq!(record.parent.zip_code.as_deref(), Some("2900"));
        assert_eq!(record.parent.latitude, Some(55.73));
        assert_eq!(record.parent.bfe_numbers.as_deref(), Some("[1234567]"));
        assert_eq!(
            record.parent.latest_sold_date,
            NaiveDate::from_ymd_opt(2019, 5, 1)
        );

        assert_eq!(record.buildings.len(), 2);
        assert!(record.buildings[0].is_main);
        assert!(!record.buildings[1].is_main);
        assert_eq!(record.buildings[0].rooms, Some(6));

        assert_eq!(record.registrations.len(), 1);
        assert_eq!(record.registrations[0].amount, Some(4_500_000.0));

        assert_eq!(record.cases.len(), 1);
        assert!(record.cases[0].created_at.is_some());
        assert!(record.cases[0].sold_at.is_none());
        assert_eq!(record.cases[0].days_on_market_total, Some(40));

        assert_eq!(record.price_changes.len(), 1);
        assert_eq!(record.price_changes[0].case_position, 0);

        assert_eq!(record.case_images.len(), 3);
        let defaults: Vec<&CaseImageRow> =
            record.case_images.iter().filter(|i| i.is_default).collect();
        assert_eq!(defaults.len(), 2);
        assert!(defaults.iter().all(|i| i.alt_text.as_deref() == Some("Facade")));
        assert!(record.case_images.iter().all(|i| i.width != 300));

        let municipality = record.municipality.as_ref().unwrap();
        assert_eq!(municipality.municipality_code, Some(157));
        assert_eq!(record.child_count(), 2 + 1 + 1 + 1 + 3 + 1);
    }

    #[test]
    fn test_float_encoded_integers_are_kept() {
        let record = RecordMapper::default()
            .map(
                &json!({
                    "addressID": "x",
                    "buildings": [{"numberOfRooms": 6.0, "yearBuilt": "1934"}],
                    "registrations": [{"municipalityCode": 157.0}]
                }),
                Utc::now(),
            )
            .unwrap();

        assert_eq!(record.buildings[0].rooms, Some(6));
        assert_eq!(record.buildings[0].year_built, Some(1934));
        assert_eq!(record.registrations[0].municipality_code, Some(157));
    }

    #[test]
    fn test_location_collections() {
        let record = RecordMapper::default()
            .map(
                &json!({
                    "addressID": "x",
                    "allowNewValuationInfo": false,
                    "slugAddress": "strandvejen-12",
                    "_links": {"self": {"href": "/addresses/x"}},
                    "boligsidenInfo": {"latestSoldArea": 182},
                    "province": {"name": "Nordsjælland", "provinceCode": 1, "regionCode": 1084},
                    "road": {"name": "Strandvejen", "roadID": "r-9"},
                    "zip": {"zipCode": 2900, "name": "Hellerup", "group": "2900"},
                    "city": {"name": "Hellerup"},
                    "place": {
                        "id": "p-1",
                        "bbox": [12.5, 55.7, 12.6, 55.8],
                        "coordinates": {"lat": 55.75, "lon": 12.55}
                    },
                    "daysOnMarket": {"realtors": [{"name": "X", "days": 30}]}
                }),
                Utc::now(),
            )
            .unwrap();

        assert_eq!(record.parent.allow_new_valuation_info, Some(false));
        assert_eq!(record.parent.api_href.as_deref(), Some("/addresses/x"));
        assert_eq!(record.parent.latest_sold_area, Some(182.0));
        assert_eq!(record.province.as_ref().unwrap().region_code.as_deref(), Some("1084"));
        assert_eq!(record.road.as_ref().unwrap().road_id.as_deref(), Some("r-9"));
        assert_eq!(record.zip.as_ref().unwrap().zip_code.as_deref(), Some("2900"));
        let place = record.place.as_ref().unwrap();
        assert_eq!(place.bbox_max_lat, Some(55.8));
        assert_eq!(place.latitude, Some(55.75));
        assert!(record.days_on_market.as_ref().unwrap().realtors.is_some());
        assert_eq!(record.child_count(), 6);
    }

    #[test]
    fn test_short_bbox_dropped() {
        let record = RecordMapper::default()
            .map(&json!({"addressID": "x", "place": {"bbox": [12.5, 55.7]}}), Utc::now())
            .unwrap();
        let place = record.place.unwrap();
        assert!(place.bbox_min_lon.is_none());
        assert!(place.bbox_max_lat.is_none());
    }

    #[test]
    fn test_absent_fields_are_none() {
        let record = RecordMapper::default()
            .map(&json!({"addressID": "x"}), Utc::now())
            .unwrap();

        assert!(record.parent.address.is_none());
        assert!(record.parent.living_area.is_none());
        assert!(record.parent.is_on_market.is_none());
        assert_eq!(record.child_count(), 0);
    }

    #[test]
    fn test_missing_primary_key() {
        let mapper = RecordMapper::default();
        assert_eq!(
            mapper.map(&json!({"roadName": "A"}), Utc::now()),
            Err(MappingError::MissingPrimaryKey)
        );
        assert_eq!(
            mapper.map(&json!({"addressID": ""}), Utc::now()),
            Err(MappingError::MissingPrimaryKey)
        );
    }

    #[test]
    fn test_malformed_payload() {
        let mapper = RecordMapper::default();
        assert!(matches!(
            mapper.map(&json!(["not", "an", "object"]), Utc::now()),
            Err(MappingError::Malformed(_))
        ));
        assert!(matches!(
            mapper.map(&json!({"addressID": "x", "buildings": 5}), Utc::now()),
            Err(MappingError::Malformed(_))
        ));
    }

    #[test]
    fn test_payload_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(payload_hash(&a), payload_hash(&b));
        assert_ne!(payload_hash(&a), payload_hash(&json!({"a": 2, "b": 2})));
    }

    #[test]
    fn test_unwrap_api_payload() {
        let wrapped = json!({"property_id": "x", "api": {"addressID": "x"}});
        assert_eq!(unwrap_api_payload(&wrapped), &json!({"addressID": "x"}));

        let plain = json!({"addressID": "y"});
        assert_eq!(unwrap_api_payload(&plain), &plain);
    }

    #[test]
    fn test_parse_dates() {
        assert_eq!(
            parse_date(Some("2021-03-04")),
            NaiveDate::from_ymd_opt(2021, 3, 4)
        );
        assert_eq!(
            parse_date(Some("2021-03-04T12:00:00Z")),
            NaiveDate::from_ymd_opt(2021, 3, 4)
        );
        assert_eq!(parse_date(Some("04/03/2021")), None);
        assert_eq!(parse_date(None), None);
        assert!(parse_timestamp(Some("2021-03-04T12:00:00")).is_some());
        assert!(parse_timestamp(Some("2021-03-04")).is_some());
    }
}
