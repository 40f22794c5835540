//! Record store abstraction
//!
//! The pipeline talks to storage only through [`RecordStore`], which keeps the
//! write path testable and the backend swappable.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          ExistenceFilter              BatchLoader           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │         RecordStore (existing_ids, write_batch, counts)     │
//! │         RecordWriter (upsert_parent, replace_children)      │
//! └─────────────────────────────────────────────────────────────┘
//!                   │                         │
//!                   ▼                         ▼
//!          ┌─────────────────┐       ┌─────────────────┐
//!          │     SQLite      │       │      Mock       │
//!          └─────────────────┘       └─────────────────┘
//! ```
//!
//! Store calls are blocking; async callers run them on `spawn_blocking`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use crate::models::EntityId;
use crate::parser::{
    BuildingRow, CaseImageRow, CaseRow, CityRow, DaysOnMarketRow, MappedRecord, MunicipalityRow,
    PlaceRow, PriceChangeRow, PropertyRow, ProvinceRow, RegistrationRow, RoadRow, ZipRow,
};
use crate::utils::error::StoreError;

// ============================================================================
// Core Types
// ============================================================================

/// Child collections of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Buildings,
    Registrations,
    Cases,
    PriceChanges,
    CaseImages,
    Municipality,
    Province,
    Road,
    Zip,
    City,
    Place,
    DaysOnMarket,
}

impl Collection {
    pub const ALL: [Collection; 12] = [
        Collection::Buildings,
        Collection::Registrations,
        Collection::Cases,
        Collection::PriceChanges,
        Collection::CaseImages,
        Collection::Municipality,
        Collection::Province,
        Collection::Road,
        Collection::Zip,
        Collection::City,
        Collection::Place,
        Collection::DaysOnMarket,
    ];

    /// Table holding this collection
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Buildings => "buildings",
            Collection::Registrations => "registrations",
            Collection::Cases => "cases",
            Collection::PriceChanges => "price_changes",
            Collection::CaseImages => "case_images",
            Collection::Municipality => "municipalities",
            Collection::Province => "provinces",
            Collection::Road => "roads",
            Collection::Zip => "zips",
            Collection::City => "cities",
            Collection::Place => "places",
            Collection::DaysOnMarket => "days_on_market",
        }
    }
}

/// The full new contents of one child collection of one parent
#[derive(Debug, Clone, Copy)]
pub enum ChildRows<'a> {
    Buildings(&'a [BuildingRow]),
    Registrations(&'a [RegistrationRow]),
    Cases(&'a [CaseRow]),
    PriceChanges(&'a [PriceChangeRow]),
    CaseImages(&'a [CaseImageRow]),
    Municipality(Option<&'a MunicipalityRow>),
    Province(Option<&'a ProvinceRow>),
    Road(Option<&'a RoadRow>),
    Zip(Option<&'a ZipRow>),
    City(Option<&'a CityRow>),
    Place(Option<&'a PlaceRow>),
    DaysOnMarket(Option<&'a DaysOnMarketRow>),
}

impl ChildRows<'_> {
    pub fn collection(&self) -> Collection {
        match self {
            ChildRows::Buildings(_) => Collection::Buildings,
            ChildRows::Registrations(_) => Collection::Registrations,
            ChildRows::Cases(_) => Collection::Cases,
            ChildRows::PriceChanges(_) => Collection::PriceChanges,
            ChildRows::CaseImages(_) => Collection::CaseImages,
            ChildRows::Municipality(_) => Collection::Municipality,
            ChildRows::Province(_) => Collection::Province,
            ChildRows::Road(_) => Collection::Road,
            ChildRows::Zip(_) => Collection::Zip,
            ChildRows::City(_) => Collection::City,
            ChildRows::Place(_) => Collection::Place,
            ChildRows::DaysOnMarket(_) => Collection::DaysOnMarket,
        }
    }

    /// Rows as JSON values, for stores without a typed schema
    fn to_values(self) -> Result<Vec<Value>, StoreError> {
        fn values<T: Serialize>(rows: &[T]) -> Result<Vec<Value>, StoreError> {
            rows.iter()
                .map(|r| serde_json::to_value(r).map_err(StoreError::from))
                .collect()
        }

        match self {
            ChildRows::Buildings(rows) => values(rows),
            ChildRows::Registrations(rows) => values(rows),
            ChildRows::Cases(rows) => values(rows),
            ChildRows::PriceChanges(rows) => values(rows),
            ChildRows::CaseImages(rows) => values(rows),
            ChildRows::Municipality(row) => values(row.as_slice()),
            ChildRows::Province(row) => values(row.as_slice()),
            ChildRows::Road(row) => values(row.as_slice()),
            ChildRows::Zip(row) => values(row.as_slice()),
            ChildRows::City(row) => values(row.as_slice()),
            ChildRows::Place(row) => values(row.as_slice()),
            ChildRows::DaysOnMarket(row) => values(row.as_slice()),
        }
    }
}

/// Every child collection of a record, in write order
pub fn child_sets(record: &MappedRecord) -> [ChildRows<'_>; 12] {
    [
        ChildRows::Buildings(&record.buildings),
        ChildRows::Registrations(&record.registrations),
        ChildRows::Cases(&record.cases),
        ChildRows::PriceChanges(&record.price_changes),
        ChildRows::CaseImages(&record.case_images),
        ChildRows::Municipality(record.municipality.as_ref()),
        ChildRows::Province(record.province.as_ref()),
        ChildRows::Road(record.road.as_ref()),
        ChildRows::Zip(record.zip.as_ref()),
        ChildRows::City(record.city.as_ref()),
        ChildRows::Place(record.place.as_ref()),
        ChildRows::DaysOnMarket(record.days_on_market.as_ref()),
    ]
}

/// Row counts per table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub properties: u64,
    pub children: Vec<(Collection, u64)>,
}

impl StoreCounts {
    pub fn collection(&self, collection: Collection) -> u64 {
        self.children
            .iter()
            .find(|(c, _)| *c == collection)
            .map_or(0, |(_, n)| *n)
    }
}

impl Serialize for Collection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.table())
    }
}

// ============================================================================
// Repository Traits
// ============================================================================

/// Write primitives used inside one transaction
pub trait RecordWriter {
    /// Insert the parent row or update it in place
    fn upsert_parent(&mut self, row: &PropertyRow) -> Result<(), StoreError>;

    /// Replace a child collection of `parent` with exactly `rows`
    fn replace_children(&mut self, parent: &EntityId, rows: ChildRows<'_>)
        -> Result<(), StoreError>;
}

/// Write one record: parent first, then every child collection
pub fn write_record<W: RecordWriter + ?Sized>(
    writer: &mut W,
    record: &MappedRecord,
) -> Result<(), StoreError> {
    writer.upsert_parent(&record.parent)?;
    for rows in child_sets(record) {
        writer.replace_children(record.id(), rows)?;
    }
    Ok(())
}

/// Persistent store of mapped records
pub trait RecordStore: Send + Sync {
    /// Which of `ids` already have a parent row
    fn existing_ids(&self, ids: &[EntityId]) -> Result<HashSet<EntityId>, StoreError>;

    /// Write all records in one transaction; on error nothing is written
    fn write_batch(&self, records: &[MappedRecord]) -> Result<(), StoreError>;

    /// Row counts per table
    fn counts(&self) -> Result<StoreCounts, StoreError>;

    /// Stored payload hash of a parent, if present
    fn payload_hash(&self, id: &EntityId) -> Result<Option<String>, StoreError>;

    /// Rows of one collection stored for a parent
    fn child_count(&self, id: &EntityId, collection: Collection) -> Result<u64, StoreError>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// How long a write waits on a lock held by another connection
pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite implementation of RecordStore
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("cannot open {}: {e}", path.display())))?;

        conn.busy_timeout(SQLITE_BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite record store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Create database schema
    fn create_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS properties (
                    id TEXT PRIMARY KEY,
                    address TEXT,
                    address_type TEXT,
                    road_name TEXT,
                    house_number TEXT,
                    zip_code TEXT,
                    city_name TEXT,
                    place_name TEXT,
                    latitude REAL,
                    longitude REAL,
                    coordinate_type TEXT,
                    living_area REAL,
                    weighted_area REAL,
                    latest_valuation REAL,
                    property_number TEXT,
                    is_on_market INTEGER,
                    is_public INTEGER,
                    allow_new_valuation_info INTEGER,
                    energy_label TEXT,
                    entry_address_id TEXT,
                    gstkvhx TEXT,
                    slug TEXT,
                    slug_address TEXT,
                    api_href TEXT,
                    bfe_numbers TEXT,
                    latest_sold_title TEXT,
                    latest_sold_body TEXT,
                    latest_sold_date TEXT,
                    latest_sold_area REAL,
                    payload_hash TEXT NOT NULL,
                    fetched_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_properties_zip ON properties(zip_code);

                CREATE TABLE IF NOT EXISTS buildings (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    position INTEGER NOT NULL,
                    is_main INTEGER NOT NULL,
                    building_name TEXT,
                    building_number TEXT,
                    housing_area REAL,
                    total_area REAL,
                    basement_area REAL,
                    business_area REAL,
                    other_area REAL,
                    rooms INTEGER,
                    floors INTEGER,
                    bathrooms INTEGER,
                    kitchens INTEGER,
                    toilets INTEGER,
                    bathroom_condition TEXT,
                    kitchen_condition TEXT,
                    toilet_condition TEXT,
                    external_wall_material TEXT,
                    supplementary_external_wall_material TEXT,
                    roofing_material TEXT,
                    supplementary_roofing_material TEXT,
                    heating_installation TEXT,
                    supplementary_heating TEXT,
                    asbestos_containing_material TEXT,
                    year_built INTEGER,
                    year_renovated INTEGER
                );

                CREATE INDEX IF NOT EXISTS idx_buildings_property ON buildings(property_id);

                CREATE TABLE IF NOT EXISTS registrations (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    position INTEGER NOT NULL,
                    registration_id TEXT,
                    amount REAL,
                    date TEXT,
                    kind TEXT,
                    area REAL,
                    living_area REAL,
                    per_area_price REAL,
                    municipality_code INTEGER,
                    property_number TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_registrations_property ON registrations(property_id);

                CREATE TABLE IF NOT EXISTS cases (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    position INTEGER NOT NULL,
                    case_id TEXT,
                    status TEXT,
                    price_cash REAL,
                    original_price REAL,
                    price_change_percentage REAL,
                    per_area_price REAL,
                    monthly_expense REAL,
                    created_at TEXT,
                    modified_at TEXT,
                    sold_at TEXT,
                    days_on_market_current INTEGER,
                    days_on_market_total INTEGER,
                    realtors TEXT,
                    lot_area REAL,
                    year_built INTEGER,
                    description_title TEXT,
                    description_body TEXT,
                    case_url TEXT,
                    provider_case_id TEXT,
                    has_balcony INTEGER,
                    has_terrace INTEGER,
                    has_elevator INTEGER,
                    highlighted INTEGER,
                    distinction TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_cases_property ON cases(property_id);

                CREATE TABLE IF NOT EXISTS price_changes (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    case_position INTEGER NOT NULL,
                    position INTEGER NOT NULL,
                    changed_at TEXT,
                    old_price REAL,
                    new_price REAL,
                    price_change REAL
                );

                CREATE INDEX IF NOT EXISTS idx_price_changes_property ON price_changes(property_id);

                CREATE TABLE IF NOT EXISTS case_images (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    case_position INTEGER NOT NULL,
                    position INTEGER NOT NULL,
                    url TEXT NOT NULL,
                    width INTEGER NOT NULL,
                    height INTEGER NOT NULL,
                    is_default INTEGER NOT NULL,
                    alt_text TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_case_images_property ON case_images(property_id);

                CREATE TABLE IF NOT EXISTS municipalities (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    municipality_code INTEGER,
                    name TEXT,
                    slug TEXT,
                    church_tax_percentage REAL,
                    council_tax_percentage REAL,
                    land_value_tax_level_per_thousand REAL,
                    number_of_schools INTEGER,
                    population INTEGER
                );

                CREATE INDEX IF NOT EXISTS idx_municipalities_property ON municipalities(property_id);

                CREATE TABLE IF NOT EXISTS provinces (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    name TEXT,
                    province_code TEXT,
                    region_code TEXT,
                    slug TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_provinces_property ON provinces(property_id);

                CREATE TABLE IF NOT EXISTS roads (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    name TEXT,
                    road_code TEXT,
                    road_id TEXT,
                    slug TEXT,
                    municipality_code INTEGER
                );

                CREATE INDEX IF NOT EXISTS idx_roads_property ON roads(property_id);

                CREATE TABLE IF NOT EXISTS zips (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    zip_code TEXT,
                    name TEXT,
                    slug TEXT,
                    zip_group TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_zips_property ON zips(property_id);

                CREATE TABLE IF NOT EXISTS cities (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    name TEXT,
                    slug TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_cities_property ON cities(property_id);

                CREATE TABLE IF NOT EXISTS places (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    place_id TEXT,
                    name TEXT,
                    slug TEXT,
                    bbox_min_lon REAL,
                    bbox_min_lat REAL,
                    bbox_max_lon REAL,
                    bbox_max_lat REAL,
                    latitude REAL,
                    longitude REAL,
                    coordinate_type TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_places_property ON places(property_id);

                CREATE TABLE IF NOT EXISTS days_on_market (
                    row_id INTEGER PRIMARY KEY,
                    property_id TEXT NOT NULL REFERENCES properties(id),
                    days INTEGER,
                    realtors TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_days_on_market_property ON days_on_market(property_id);
                "#,
        )?;

        Ok(())
    }
}

/// [`RecordWriter`] over an open SQLite transaction
struct SqliteWriter<'a> {
    tx: &'a Connection,
}

impl RecordWriter for SqliteWriter<'_> {
    fn upsert_parent(&mut self, row: &PropertyRow) -> Result<(), StoreError> {
        let mut stmt = self.tx.prepare_cached(
            r#"
            INSERT INTO properties (
                id, address, address_type, road_name, house_number, zip_code, city_name,
                place_name, latitude, longitude, coordinate_type, living_area, weighted_area,
                latest_valuation, property_number, is_on_market, is_public,
                allow_new_valuation_info, energy_label, entry_address_id, gstkvhx, slug,
                slug_address, api_href, bfe_numbers, latest_sold_title, latest_sold_body,
                latest_sold_date, latest_sold_area, payload_hash, fetched_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32
            )
            ON CONFLICT(id) DO UPDATE SET
                address = excluded.address,
                address_type = excluded.address_type,
                road_name = excluded.road_name,
                house_number = excluded.house_number,
                zip_code = excluded.zip_code,
                city_name = excluded.city_name,
                place_name = excluded.place_name,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                coordinate_type = excluded.coordinate_type,
                living_area = excluded.living_area,
                weighted_area = excluded.weighted_area,
                latest_valuation = excluded.latest_valuation,
                property_number = excluded.property_number,
                is_on_market = excluded.is_on_market,
                is_public = excluded.is_public,
                allow_new_valuation_info = excluded.allow_new_valuation_info,
                energy_label = excluded.energy_label,
                entry_address_id = excluded.entry_address_id,
                gstkvhx = excluded.gstkvhx,
                slug = excluded.slug,
                slug_address = excluded.slug_address,
                api_href = excluded.api_href,
                bfe_numbers = excluded.bfe_numbers,
                latest_sold_title = excluded.latest_sold_title,
                latest_sold_body = excluded.latest_sold_body,
                latest_sold_date = excluded.latest_sold_date,
                latest_sold_area = excluded.latest_sold_area,
                payload_hash = excluded.payload_hash,
                fetched_at = excluded.fetched_at,
                updated_at = excluded.updated_at
            "#,
        )?;

        stmt.execute(params![
            row.id.as_str(),
            row.address,
            row.address_type,
            row.road_name,
            row.house_number,
            row.zip_code,
            row.city_name,
            row.place_name,
            row.latitude,
            row.longitude,
            row.coordinate_type,
            row.living_area,
            row.weighted_area,
            row.latest_valuation,
            row.property_number,
            row.is_on_market,
            row.is_public,
            row.allow_new_valuation_info,
            row.energy_label,
            row.entry_address_id,
            row.gstkvhx,
            row.slug,
            row.slug_address,
            row.api_href,
            row.bfe_numbers,
            row.latest_sold_title,
            row.latest_sold_body,
            row.latest_sold_date.map(|d| d.to_string()),
            row.latest_sold_area,
            row.payload_hash,
            row.fetched_at.to_rfc3339(),
            chrono::Utc::now().to_rfc3339(),
        ])?;
        Ok(())
    }

    fn replace_children(
        &mut self,
        parent: &EntityId,
        rows: ChildRows<'_>,
    ) -> Result<(), StoreError> {
        let table = rows.collection().table();
        self.tx
            .prepare_cached(&format!("DELETE FROM {table} WHERE property_id = ?1"))?
            .execute([parent.as_str()])?;

        match rows {
            ChildRows::Buildings(rows) => {
                let mut stmt = self.tx.prepare_cached(
                    "INSERT INTO buildings (property_id, position, is_main, building_name, \
                     building_number, housing_area, total_area, basement_area, business_area, \
                     other_area, rooms, floors, bathrooms, kitchens, toilets, \
                     bathroom_condition, kitchen_condition, toilet_condition, \
                     external_wall_material, supplementary_external_wall_material, \
                     roofing_material, supplementary_roofing_material, heating_installation, \
                     supplementary_heating, asbestos_containing_material, year_built, \
                     year_renovated) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                     ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        parent.as_str(),
                        r.position,
                        r.is_main,
                        r.building_name,
                        r.building_number,
                        r.housing_area,
                        r.total_area,
                        r.basement_area,
                        r.business_area,
                        r.other_area,
                        r.rooms,
                        r.floors,
                        r.bathrooms,
                        r.kitchens,
                        r.toilets,
                        r.bathroom_condition,
                        r.kitchen_condition,
                        r.toilet_condition,
                        r.external_wall_material,
                        r.supplementary_external_wall_material,
                        r.roofing_material,
                        r.supplementary_roofing_material,
                        r.heating_installation,
                        r.supplementary_heating,
                        r.asbestos_containing_material,
                        r.year_built,
                        r.year_renovated,
                    ])?;
                }
            }
            ChildRows::Registrations(rows) => {
                let mut stmt = self.tx.prepare_cached(
                    "INSERT INTO registrations (property_id, position, registration_id, amount, \
                     date, kind, area, living_area, per_area_price, municipality_code, \
                     property_number) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        parent.as_str(),
                        r.position,
                        r.registration_id,
                        r.amount,
                        r.date.map(|d| d.to_string()),
                        r.kind,
                        r.area,
                        r.living_area,
                        r.per_area_price,
                        r.municipality_code,
                        r.property_number,
                    ])?;
                }
            }
            ChildRows::Cases(rows) => {
                let mut stmt = self.tx.prepare_cached(
                    "INSERT INTO cases (property_id, position, case_id, status, price_cash, \
                     original_price, price_change_percentage, per_area_price, monthly_expense, \
                     created_at, modified_at, sold_at, days_on_market_current, \
                     days_on_market_total, realtors, lot_area, year_built, description_title, \
                     description_body, case_url, provider_case_id, has_balcony, has_terrace, \
                     has_elevator, highlighted, distinction) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                     ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        parent.as_str(),
                        r.position,
                        r.case_id,
                        r.status,
                        r.price_cash,
                        r.original_price,
                        r.price_change_percentage,
                        r.per_area_price,
                        r.monthly_expense,
                        r.created_at.map(|t| t.to_rfc3339()),
                        r.modified_at.map(|t| t.to_rfc3339()),
                        r.sold_at.map(|t| t.to_rfc3339()),
                        r.days_on_market_current,
                        r.days_on_market_total,
                        r.realtors,
                        r.lot_area,
                        r.year_built,
                        r.description_title,
                        r.description_body,
                        r.case_url,
                        r.provider_case_id,
                        r.has_balcony,
                        r.has_terrace,
                        r.has_elevator,
                        r.highlighted,
                        r.distinction,
                    ])?;
                }
            }
            ChildRows::PriceChanges(rows) => {
                let mut stmt = self.tx.prepare_cached(
                    "INSERT INTO price_changes (property_id, case_position, position, changed_at, \
                     old_price, new_price, price_change) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        parent.as_str(),
                        r.case_position,
                        r.position,
                        r.changed_at.map(|t| t.to_rfc3339()),
                        r.old_price,
                        r.new_price,
                        r.price_change,
                    ])?;
                }
            }
            ChildRows::CaseImages(rows) => {
                let mut stmt = self.tx.prepare_cached(
                    "INSERT INTO case_images (property_id, case_position, position, url, width, \
                     height, is_default, alt_text) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        parent.as_str(),
                        r.case_position,
                        r.position,
                        r.url,
                        r.width,
                        r.height,
                        r.is_default,
                        r.alt_text,
                    ])?;
                }
            }
            ChildRows::Municipality(row) => {
                if let Some(r) = row {
                    self.tx
                        .prepare_cached(
                            "INSERT INTO municipalities (property_id, municipality_code, name, \
                             slug, church_tax_percentage, council_tax_percentage, \
                             land_value_tax_level_per_thousand, number_of_schools, population) \
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        )?
                        .execute(params![
                            parent.as_str(),
                            r.municipality_code,
                            r.name,
                            r.slug,
                            r.church_tax_percentage,
                            r.council_tax_percentage,
                            r.land_value_tax_level_per_thousand,
                            r.number_of_schools,
                            r.population,
                        ])?;
                }
            }
            ChildRows::Province(row) => {
                if let Some(r) = row {
                    self.tx
                        .prepare_cached(
                            "INSERT INTO provinces (property_id, name, province_code, \
                             region_code, slug) VALUES (?1, ?2, ?3, ?4, ?5)",
                        )?
                        .execute(params![
                            parent.as_str(),
                            r.name,
                            r.province_code,
                            r.region_code,
                            r.slug,
                        ])?;
                }
            }
            ChildRows::Road(row) => {
                if let Some(r) = row {
                    self.tx
                        .prepare_cached(
                            "INSERT INTO roads (property_id, name, road_code, road_id, slug, \
                             municipality_code) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        )?
                        .execute(params![
                            parent.as_str(),
                            r.name,
                            r.road_code,
                            r.road_id,
                            r.slug,
                            r.municipality_code,
                        ])?;
                }
            }
            ChildRows::Zip(row) => {
                if let Some(r) = row {
                    self.tx
                        .prepare_cached(
                            "INSERT INTO zips (property_id, zip_code, name, slug, zip_group) \
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                        )?
                        .execute(params![parent.as_str(), r.zip_code, r.name, r.slug, r.zip_group])?;
                }
            }
            ChildRows::City(row) => {
                if let Some(r) = row {
                    self.tx
                        .prepare_cached("INSERT INTO cities (property_id, name, slug) VALUES (?1, ?2, ?3)")?
                        .execute(params![parent.as_str(), r.name, r.slug])?;
                }
            }
            ChildRows::Place(row) => {
                if let Some(r) = row {
                    self.tx
                        .prepare_cached(
                            "INSERT INTO places (property_id, place_id, name, slug, bbox_min_lon, \
                             bbox_min_lat, bbox_max_lon, bbox_max_lat, latitude, longitude, \
                             coordinate_type) \
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                        )?
                        .execute(params![
                            parent.as_str(),
                            r.place_id,
                            r.name,
                            r.slug,
                            r.bbox_min_lon,
                            r.bbox_min_lat,
                            r.bbox_max_lon,
                            r.bbox_max_lat,
                            r.latitude,
                            r.longitude,
                            r.coordinate_type,
                        ])?;
                }
            }
            ChildRows::DaysOnMarket(row) => {
                if let Some(r) = row {
                    self.tx
                        .prepare_cached(
                            "INSERT INTO days_on_market (property_id, days, realtors) \
                             VALUES (?1, ?2, ?3)",
                        )?
                        .execute(params![parent.as_str(), r.days, r.realtors])?;
                }
            }
        }

        Ok(())
    }
}

impl RecordStore for SqliteRecordStore {
    fn existing_ids(&self, ids: &[EntityId]) -> Result<HashSet<EntityId>, StoreError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let conn = self.lock()?;
        let placeholders: String = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!("SELECT id FROM properties WHERE id IN ({placeholders})");

        let mut stmt = conn.prepare(&query)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();

        let existing = stmt
            .query_map(params.as_slice(), |row| row.get::<_, String>(0))?
            .map(|r| r.map(EntityId::new))
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(existing)
    }

    fn write_batch(&self, records: &[MappedRecord]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut writer = SqliteWriter { tx: &tx };
            for record in records {
                write_record(&mut writer, record).map_err(|e| match e {
                    e if e.is_unavailable() || matches!(e, StoreError::Write { .. }) => e,
                    other => StoreError::Write {
                        id: record.id().to_string(),
                        message: other.to_string(),
                    },
                })?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn counts(&self) -> Result<StoreCounts, StoreError> {
        let conn = self.lock()?;
        let count = |table: &str| -> Result<u64, StoreError> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        };

        let properties = count("properties")?;
        let children = Collection::ALL
            .iter()
            .map(|c| count(c.table()).map(|n| (*c, n)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoreCounts {
            properties,
            children,
        })
    }

    fn payload_hash(&self, id: &EntityId) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let hash = conn
            .query_row(
                "SELECT payload_hash FROM properties WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    fn child_count(&self, id: &EntityId, collection: Collection) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE property_id = ?1",
                collection.table()
            ),
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

impl rusqlite::ToSql for EntityId {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        self.as_str().to_sql()
    }
}

// ============================================================================
// Mock Implementation
// ============================================================================

#[derive(Debug, Default, Clone)]
struct MockState {
    parents: HashMap<EntityId, PropertyRow>,
    children: HashMap<(Collection, EntityId), Vec<Value>>,
}

impl RecordWriter for MockState {
    fn upsert_parent(&mut self, row: &PropertyRow) -> Result<(), StoreError> {
        self.parents.insert(row.id.clone(), row.clone());
        Ok(())
    }

    fn replace_children(
        &mut self,
        parent: &EntityId,
        rows: ChildRows<'_>,
    ) -> Result<(), StoreError> {
        if !self.parents.contains_key(parent) {
            return Err(StoreError::Write {
                id: parent.to_string(),
                message: "child rows without parent".to_string(),
            });
        }
        let collection = rows.collection();
        let values = rows.to_values()?;
        if values.is_empty() {
            self.children.remove(&(collection, parent.clone()));
        } else {
            self.children.insert((collection, parent.clone()), values);
        }
        Ok(())
    }
}

/// In-memory mock implementation of RecordStore
#[derive(Debug, Default)]
pub struct MockRecordStore {
    state: RwLock<MockState>,
    failing_ids: RwLock<HashSet<EntityId>>,
    unavailable: RwLock<bool>,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any batch containing `id`
    pub fn fail_on(&self, id: impl Into<EntityId>) {
        if let Ok(mut ids) = self.failing_ids.write() {
            ids.insert(id.into());
        }
    }

    /// Make every call fail as if the store were gone
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.unavailable.write() {
            *flag = unavailable;
        }
    }

    /// Get number of stored parents
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.parents.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        let unavailable = self
            .unavailable
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        if *unavailable {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, MockState>, StoreError> {
        self.check_available()?;
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

impl RecordStore for MockRecordStore {
    fn existing_ids(&self, ids: &[EntityId]) -> Result<HashSet<EntityId>, StoreError> {
        let state = self.read_state()?;
        Ok(ids
            .iter()
            .filter(|id| state.parents.contains_key(*id))
            .cloned()
            .collect())
    }

    fn write_batch(&self, records: &[MappedRecord]) -> Result<(), StoreError> {
        self.check_available()?;

        let failing = self
            .failing_ids
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        // apply to a copy so a failing batch leaves no trace
        let mut staged = state.clone();
        for record in records {
            if failing.contains(record.id()) {
                return Err(StoreError::Write {
                    id: record.id().to_string(),
                    message: "rejected by mock store".to_string(),
                });
            }
            write_record(&mut staged, record)?;
        }
        *state = staged;
        Ok(())
    }

    fn counts(&self) -> Result<StoreCounts, StoreError> {
        let state = self.read_state()?;
        let children = Collection::ALL
            .iter()
            .map(|c| {
                let n: usize = state
                    .children
                    .iter()
                    .filter(|((collection, _), _)| collection == c)
                    .map(|(_, rows)| rows.len())
                    .sum();
                (*c, n as u64)
            })
            .collect();

        Ok(StoreCounts {
            properties: state.parents.len() as u64,
            children,
        })
    }

    fn payload_hash(&self, id: &EntityId) -> Result<Option<String>, StoreError> {
        let state = self.read_state()?;
        Ok(state.parents.get(id).map(|p| p.payload_hash.clone()))
    }

    fn child_count(&self, id: &EntityId, collection: Collection) -> Result<u64, StoreError> {
        let state = self.read_state()?;
        Ok(state
            .children
            .get(&(collection, id.clone()))
            .map_or(0, |rows| rows.len() as u64))
    }
}

// ============================================================================
// Shared Store Types
// ============================================================================

/// Thread-safe shared store handle
pub type SharedRecordStore = Arc<dyn RecordStore>;

/// Create a shared SQLite store
pub fn create_sqlite_store(path: impl AsRef<Path>) -> Result<SharedRecordStore, StoreError> {
    Ok(Arc::new(SqliteRecordStore::new(path)?))
}

/// Create a shared mock store
pub fn create_mock_store() -> SharedRecordStore {
    Arc::new(MockRecordStore::new())
}

// ============================================================================
// Tests
// ============================================================================
