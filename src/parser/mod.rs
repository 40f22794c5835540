//! Detail payload parsing
//!
//! Raw payloads are deserialized into the typed schema in [`payload`] and then
//! flattened into the relational rows of [`record`]. Mapping is pure: no I/O,
//! no clock reads beyond the `fetched_at` the caller passes in.

pub mod payload;
pub mod record;

pub use payload::PropertyPayload;
pub use record::{
    parse_date, parse_timestamp, payload_hash, unwrap_api_payload, BuildingRow, CaseImageRow,
    CaseRow, CityRow, DaysOnMarketRow, MappedRecord, MunicipalityRow, PlaceRow, PriceChangeRow,
    PropertyRow, ProvinceRow, RecordMapper, RegistrationRow, RoadRow, ZipRow,
};
