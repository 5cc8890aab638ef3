//! Fixed-column parsing of the schedule archive's text tables and their
//! FK-ordered bulk inserts.
//!
//! Each table has a fixed column set; unknown columns are ignored, missing
//! optional files yield empty tables. Scheduled times stay as raw
//! seconds-past-midnight strings ("HH:MM:SS", hours may exceed 24).

use std::collections::HashSet;
use std::fs::File;

use sqlx::SqlitePool;
use tracing::{info, warn};
use zip::ZipArchive;

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct AgencyRow {
    pub agency_id: String,
    pub name: Option<String>,
    pub url: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CalendarRow {
    pub service_id: String,
    pub days: [bool; 7],
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone)]
pub struct CalendarExceptionRow {
    pub service_id: String,
    pub date: String,
    pub exception_type: i32,
}

#[derive(Debug, Clone)]
pub struct StopRow {
    pub stop_id: String,
    pub name: Option<String>,
    pub platform_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub parent_station: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RouteRow {
    pub route_id: String,
    pub agency_id: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub route_type: i32,
    pub color: Option<String>,
    pub text_color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShapePointRow {
    pub shape_id: String,
    pub lat: f64,
    pub lon: f64,
    pub sequence: i64,
}

#[derive(Debug, Clone)]
pub struct TripRow {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub headsign: Option<String>,
    pub direction_id: Option<i32>,
    pub shape_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MultiRouteTripRow {
    pub added_route_id: String,
    pub trip_id: String,
}

#[derive(Debug, Clone)]
pub struct StopTimeRow {
    pub trip_id: String,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    pub stop_id: String,
    pub stop_sequence: i64,
}

#[derive(Debug, Clone)]
pub struct LinkedDatasetRow {
    pub url: String,
    pub trip_updates: bool,
    pub vehicle_positions: bool,
    pub service_alerts: bool,
    pub authentication_type: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct FacilityRow {
    pub facility_id: String,
    pub facility_type: String,
    pub stop_id: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct FacilityPropertyRow {
    pub facility_id: String,
    pub property_id: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransferRow {
    pub from_stop_id: Option<String>,
    pub to_stop_id: Option<String>,
    pub transfer_type: Option<i32>,
    pub min_transfer_time: Option<i32>,
    pub from_trip_id: Option<String>,
    pub to_trip_id: Option<String>,
}

/// Everything parsed out of one schedule archive, in memory.
#[derive(Debug, Default)]
pub struct StaticTables {
    pub agencies: Vec<AgencyRow>,
    pub calendars: Vec<CalendarRow>,
    pub calendar_exceptions: Vec<CalendarExceptionRow>,
    pub stops: Vec<StopRow>,
    pub routes: Vec<RouteRow>,
    pub shape_points: Vec<ShapePointRow>,
    pub trips: Vec<TripRow>,
    pub multi_route_trips: Vec<MultiRouteTripRow>,
    pub stop_times: Vec<StopTimeRow>,
    pub linked_datasets: Vec<LinkedDatasetRow>,
    pub facilities: Vec<FacilityRow>,
    pub facility_properties: Vec<FacilityPropertyRow>,
    pub transfers: Vec<TransferRow>,
}

impl StaticTables {
    /// Distinct shape ids referenced by the shape-points table, in first-seen
    /// order. Shapes have no source table of their own.
    pub fn shape_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for pt in &self.shape_points {
            if seen.insert(pt.shape_id.as_str()) {
                ids.push(pt.shape_id.clone());
            }
        }
        ids
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn required_idx(
    headers: &csv::StringRecord,
    file: &str,
    name: &str,
) -> Result<usize, EngineError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| EngineError::ParseError(format!("{file} missing {name}")))
}

fn optional_idx(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn get_opt(record: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| record.get(i)).and_then(non_empty)
}

/// Parse the whole archive (blocking; call on spawn_blocking).
pub fn parse_archive(zip_path: &std::path::Path) -> Result<StaticTables, EngineError> {
    let file = File::open(zip_path)?;
    let mut archive = ZipArchive::new(file)?;

    Ok(StaticTables {
        agencies: parse_agencies(&mut archive)?,
        calendars: parse_calendars(&mut archive)?,
        calendar_exceptions: parse_calendar_exceptions(&mut archive)?,
        stops: parse_stops(&mut archive)?,
        routes: parse_routes(&mut archive)?,
        shape_points: parse_shape_points(&mut archive)?,
        trips: parse_trips(&mut archive)?,
        multi_route_trips: parse_multi_route_trips(&mut archive)?,
        stop_times: parse_stop_times(&mut archive)?,
        linked_datasets: parse_linked_datasets(&mut archive)?,
        facilities: parse_facilities(&mut archive)?,
        facility_properties: parse_facility_properties(&mut archive)?,
        transfers: parse_transfers(&mut archive)?,
    })
}

fn parse_agencies(archive: &mut ZipArchive<File>) -> Result<Vec<AgencyRow>, EngineError> {
    let file = archive.by_name("agency.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_id = required_idx(&headers, "agency.txt", "agency_id")?;
    let idx_name = optional_idx(&headers, "agency_name");
    let idx_url = optional_idx(&headers, "agency_url");
    let idx_tz = optional_idx(&headers, "agency_timezone");

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let agency_id = record.get(idx_id).unwrap_or("").to_string();
        if agency_id.is_empty() {
            continue;
        }
        rows.push(AgencyRow {
            agency_id,
            name: get_opt(&record, idx_name),
            url: get_opt(&record, idx_url),
            timezone: get_opt(&record, idx_tz),
        });
    }
    Ok(rows)
}

fn parse_calendars(archive: &mut ZipArchive<File>) -> Result<Vec<CalendarRow>, EngineError> {
    let file = match archive.by_name("calendar.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("No calendar.txt in schedule archive (optional file)");
            return Ok(Vec::new());
        }
    };
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_service = required_idx(&headers, "calendar.txt", "service_id")?;
    let day_idx: Vec<Option<usize>> = [
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
    ]
    .iter()
    .map(|d| optional_idx(&headers, d))
    .collect();
    let idx_start = required_idx(&headers, "calendar.txt", "start_date")?;
    let idx_end = required_idx(&headers, "calendar.txt", "end_date")?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let service_id = record.get(idx_service).unwrap_or("").to_string();
        let start_date = record.get(idx_start).unwrap_or("").to_string();
        let end_date = record.get(idx_end).unwrap_or("").to_string();
        if service_id.is_empty() || start_date.is_empty() || end_date.is_empty() {
            skipped += 1;
            continue;
        }
        let mut days = [false; 7];
        for (day, idx) in days.iter_mut().zip(day_idx.iter()) {
            *day = idx
                .and_then(|i| record.get(i))
                .and_then(|s| s.parse::<i32>().ok())
                .map(|v| v == 1)
                .unwrap_or(false);
        }
        rows.push(CalendarRow {
            service_id,
            days,
            start_date,
            end_date,
        });
    }
    if skipped > 0 {
        warn!(skipped, "Skipped calendar.txt records (empty/unparseable)");
    }
    Ok(rows)
}

fn parse_calendar_exceptions(
    archive: &mut ZipArchive<File>,
) -> Result<Vec<CalendarExceptionRow>, EngineError> {
    let file = match archive.by_name("calendar_dates.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("No calendar_dates.txt in schedule archive (optional file)");
            return Ok(Vec::new());
        }
    };
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_service = required_idx(&headers, "calendar_dates.txt", "service_id")?;
    let idx_date = required_idx(&headers, "calendar_dates.txt", "date")?;
    let idx_type = required_idx(&headers, "calendar_dates.txt", "exception_type")?;

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let service_id = record.get(idx_service).unwrap_or("").to_string();
        let date = record.get(idx_date).unwrap_or("").to_string();
        if service_id.is_empty() || date.is_empty() {
            continue;
        }
        rows.push(CalendarExceptionRow {
            service_id,
            date,
            exception_type: record
                .get(idx_type)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        });
    }
    Ok(rows)
}

fn parse_stops(archive: &mut ZipArchive<File>) -> Result<Vec<StopRow>, EngineError> {
    let file = archive.by_name("stops.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_id = required_idx(&headers, "stops.txt", "stop_id")?;
    let idx_name = optional_idx(&headers, "stop_name");
    let idx_platform = optional_idx(&headers, "platform_name");
    let idx_lat = optional_idx(&headers, "stop_lat");
    let idx_lon = optional_idx(&headers, "stop_lon");
    let idx_parent = optional_idx(&headers, "parent_station");

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let stop_id = record.get(idx_id).unwrap_or("").to_string();
        if stop_id.is_empty() {
            skipped += 1;
            continue;
        }
        rows.push(StopRow {
            stop_id,
            name: get_opt(&record, idx_name),
            platform_name: get_opt(&record, idx_platform),
            lat: idx_lat.and_then(|i| record.get(i)).and_then(|s| s.parse().ok()),
            lon: idx_lon.and_then(|i| record.get(i)).and_then(|s| s.parse().ok()),
            parent_station: get_opt(&record, idx_parent),
        });
    }
    if skipped > 0 {
        warn!(skipped, "Skipped stops.txt records with empty stop_id");
    }
    Ok(rows)
}

fn parse_routes(archive: &mut ZipArchive<File>) -> Result<Vec<RouteRow>, EngineError> {
    let file = archive.by_name("routes.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_id = required_idx(&headers, "routes.txt", "route_id")?;
    let idx_type = required_idx(&headers, "routes.txt", "route_type")?;
    let idx_agency = optional_idx(&headers, "agency_id");
    let idx_short = optional_idx(&headers, "route_short_name");
    let idx_long = optional_idx(&headers, "route_long_name");
    let idx_color = optional_idx(&headers, "route_color");
    let idx_text = optional_idx(&headers, "route_text_color");

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let route_id = record.get(idx_id).unwrap_or("").to_string();
        let route_type = record.get(idx_type).and_then(|s| s.parse().ok());
        let (route_id, route_type) = match (non_empty(&route_id), route_type) {
            (Some(id), Some(t)) => (id, t),
            _ => {
                skipped += 1;
                continue;
            }
        };
        rows.push(RouteRow {
            route_id,
            agency_id: get_opt(&record, idx_agency),
            short_name: get_opt(&record, idx_short),
            long_name: get_opt(&record, idx_long),
            route_type,
            color: get_opt(&record, idx_color),
            text_color: get_opt(&record, idx_text),
        });
    }
    if skipped > 0 {
        warn!(skipped, "Skipped routes.txt records (missing id or type)");
    }
    Ok(rows)
}

fn parse_shape_points(archive: &mut ZipArchive<File>) -> Result<Vec<ShapePointRow>, EngineError> {
    let file = match archive.by_name("shapes.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("No shapes.txt in schedule archive (optional file)");
            return Ok(Vec::new());
        }
    };
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_id = required_idx(&headers, "shapes.txt", "shape_id")?;
    let idx_lat = required_idx(&headers, "shapes.txt", "shape_pt_lat")?;
    let idx_lon = required_idx(&headers, "shapes.txt", "shape_pt_lon")?;
    let idx_seq = required_idx(&headers, "shapes.txt", "shape_pt_sequence")?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let shape_id = record.get(idx_id).unwrap_or("").to_string();
        let lat = record.get(idx_lat).and_then(|s| s.parse().ok());
        let lon = record.get(idx_lon).and_then(|s| s.parse().ok());
        let sequence = record.get(idx_seq).and_then(|s| s.parse().ok());
        match (non_empty(&shape_id), lat, lon, sequence) {
            (Some(shape_id), Some(lat), Some(lon), Some(sequence)) => rows.push(ShapePointRow {
                shape_id,
                lat,
                lon,
                sequence,
            }),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "Skipped shapes.txt records (unparseable)");
    }
    Ok(rows)
}

fn parse_trips(archive: &mut ZipArchive<File>) -> Result<Vec<TripRow>, EngineError> {
    let file = archive.by_name("trips.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_trip = required_idx(&headers, "trips.txt", "trip_id")?;
    let idx_route = required_idx(&headers, "trips.txt", "route_id")?;
    let idx_service = required_idx(&headers, "trips.txt", "service_id")?;
    let idx_headsign = optional_idx(&headers, "trip_headsign");
    let idx_dir = optional_idx(&headers, "direction_id");
    let idx_shape = optional_idx(&headers, "shape_id");

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let trip_id = record.get(idx_trip).unwrap_or("").to_string();
        if trip_id.is_empty() {
            skipped += 1;
            continue;
        }
        rows.push(TripRow {
            trip_id,
            route_id: record.get(idx_route).unwrap_or("").to_string(),
            service_id: record.get(idx_service).unwrap_or("").to_string(),
            headsign: get_opt(&record, idx_headsign),
            direction_id: idx_dir.and_then(|i| record.get(i)).and_then(|s| s.parse().ok()),
            shape_id: get_opt(&record, idx_shape),
        });
    }
    if skipped > 0 {
        warn!(skipped, "Skipped trips.txt records with empty trip_id");
    }
    Ok(rows)
}

fn parse_multi_route_trips(
    archive: &mut ZipArchive<File>,
) -> Result<Vec<MultiRouteTripRow>, EngineError> {
    let file = match archive.by_name("multi_route_trips.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("No multi_route_trips.txt in schedule archive (optional file)");
            return Ok(Vec::new());
        }
    };
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_route = required_idx(&headers, "multi_route_trips.txt", "added_route_id")?;
    let idx_trip = required_idx(&headers, "multi_route_trips.txt", "trip_id")?;

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let added_route_id = record.get(idx_route).unwrap_or("").to_string();
        let trip_id = record.get(idx_trip).unwrap_or("").to_string();
        if added_route_id.is_empty() || trip_id.is_empty() {
            continue;
        }
        rows.push(MultiRouteTripRow {
            added_route_id,
            trip_id,
        });
    }
    Ok(rows)
}

fn parse_stop_times(archive: &mut ZipArchive<File>) -> Result<Vec<StopTimeRow>, EngineError> {
    let file = archive.by_name("stop_times.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_trip = required_idx(&headers, "stop_times.txt", "trip_id")?;
    let idx_stop = required_idx(&headers, "stop_times.txt", "stop_id")?;
    let idx_seq = required_idx(&headers, "stop_times.txt", "stop_sequence")?;
    let idx_arr = optional_idx(&headers, "arrival_time");
    let idx_dep = optional_idx(&headers, "departure_time");

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let trip_id = record.get(idx_trip).unwrap_or("").to_string();
        let stop_id = record.get(idx_stop).unwrap_or("").to_string();
        let sequence = record.get(idx_seq).and_then(|s| s.parse().ok());
        let (trip_id, stop_id, stop_sequence) =
            match (non_empty(&trip_id), non_empty(&stop_id), sequence) {
                (Some(t), Some(s), Some(q)) => (t, s, q),
                _ => {
                    skipped += 1;
                    continue;
                }
            };
        rows.push(StopTimeRow {
            trip_id,
            arrival_time: get_opt(&record, idx_arr),
            departure_time: get_opt(&record, idx_dep),
            stop_id,
            stop_sequence,
        });
    }
    if skipped > 0 {
        warn!(skipped, "Skipped stop_times.txt records (unparseable)");
    }
    Ok(rows)
}

fn parse_linked_datasets(
    archive: &mut ZipArchive<File>,
) -> Result<Vec<LinkedDatasetRow>, EngineError> {
    let file = match archive.by_name("linked_datasets.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("No linked_datasets.txt in schedule archive (optional file)");
            return Ok(Vec::new());
        }
    };
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_url = required_idx(&headers, "linked_datasets.txt", "url")?;
    let idx_tu = optional_idx(&headers, "trip_updates");
    let idx_vp = optional_idx(&headers, "vehicle_positions");
    let idx_sa = optional_idx(&headers, "service_alerts");
    let idx_auth = optional_idx(&headers, "authentication_type");

    let flag = |record: &csv::StringRecord, idx: Option<usize>| -> bool {
        idx.and_then(|i| record.get(i))
            .and_then(|s| s.parse::<i32>().ok())
            .map(|v| v == 1)
            .unwrap_or(false)
    };

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let url = record.get(idx_url).unwrap_or("").to_string();
        if url.is_empty() {
            continue;
        }
        rows.push(LinkedDatasetRow {
            url,
            trip_updates: flag(&record, idx_tu),
            vehicle_positions: flag(&record, idx_vp),
            service_alerts: flag(&record, idx_sa),
            authentication_type: idx_auth
                .and_then(|i| record.get(i))
                .and_then(|s| s.parse().ok()),
        });
    }
    Ok(rows)
}

fn parse_facilities(archive: &mut ZipArchive<File>) -> Result<Vec<FacilityRow>, EngineError> {
    let file = match archive.by_name("facilities.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("No facilities.txt in schedule archive (optional file)");
            return Ok(Vec::new());
        }
    };
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_id = required_idx(&headers, "facilities.txt", "facility_id")?;
    let idx_type = required_idx(&headers, "facilities.txt", "facility_type")?;
    let idx_stop = optional_idx(&headers, "stop_id");
    let idx_short = optional_idx(&headers, "facility_short_name");
    let idx_long = optional_idx(&headers, "facility_long_name");
    let idx_lat = optional_idx(&headers, "facility_lat");
    let idx_lon = optional_idx(&headers, "facility_lon");

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let facility_id = record.get(idx_id).unwrap_or("").to_string();
        let facility_type = record.get(idx_type).unwrap_or("").to_string();
        if facility_id.is_empty() || facility_type.is_empty() {
            continue;
        }
        rows.push(FacilityRow {
            facility_id,
            facility_type,
            stop_id: get_opt(&record, idx_stop),
            short_name: get_opt(&record, idx_short),
            long_name: get_opt(&record, idx_long),
            lat: idx_lat.and_then(|i| record.get(i)).and_then(|s| s.parse().ok()),
            lon: idx_lon.and_then(|i| record.get(i)).and_then(|s| s.parse().ok()),
        });
    }
    Ok(rows)
}

fn parse_facility_properties(
    archive: &mut ZipArchive<File>,
) -> Result<Vec<FacilityPropertyRow>, EngineError> {
    let file = match archive.by_name("facilities_properties.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("No facilities_properties.txt in schedule archive (optional file)");
            return Ok(Vec::new());
        }
    };
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_facility = required_idx(&headers, "facilities_properties.txt", "facility_id")?;
    let idx_property = required_idx(&headers, "facilities_properties.txt", "property_id")?;
    let idx_value = optional_idx(&headers, "value");

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let facility_id = record.get(idx_facility).unwrap_or("").to_string();
        let property_id = record.get(idx_property).unwrap_or("").to_string();
        if facility_id.is_empty() || property_id.is_empty() {
            continue;
        }
        rows.push(FacilityPropertyRow {
            facility_id,
            property_id,
            value: get_opt(&record, idx_value),
        });
    }
    Ok(rows)
}

fn parse_transfers(archive: &mut ZipArchive<File>) -> Result<Vec<TransferRow>, EngineError> {
    let file = match archive.by_name("transfers.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("No transfers.txt in schedule archive (optional file)");
            return Ok(Vec::new());
        }
    };
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_from = optional_idx(&headers, "from_stop_id");
    let idx_to = optional_idx(&headers, "to_stop_id");
    let idx_type = optional_idx(&headers, "transfer_type");
    let idx_time = optional_idx(&headers, "min_transfer_time");
    let idx_from_trip = optional_idx(&headers, "from_trip_id");
    let idx_to_trip = optional_idx(&headers, "to_trip_id");

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(TransferRow {
            from_stop_id: get_opt(&record, idx_from),
            to_stop_id: get_opt(&record, idx_to),
            transfer_type: idx_type.and_then(|i| record.get(i)).and_then(|s| s.parse().ok()),
            min_transfer_time: idx_time
                .and_then(|i| record.get(i))
                .and_then(|s| s.parse().ok()),
            from_trip_id: get_opt(&record, idx_from_trip),
            to_trip_id: get_opt(&record, idx_to_trip),
        });
    }
    Ok(rows)
}

/// Insert all tables in FK-safe dependency order within a single
/// transaction, logging the row count for each.
pub async fn insert_all(pool: &SqlitePool, tables: &StaticTables) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;

    for a in &tables.agencies {
        sqlx::query(
            "INSERT INTO agencies (agency_id, agency_name, agency_url, agency_timezone)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&a.agency_id)
        .bind(&a.name)
        .bind(&a.url)
        .bind(&a.timezone)
        .execute(&mut *tx)
        .await?;
    }
    info!(rows = tables.agencies.len(), table = "agencies", "Loaded static table");

    for c in &tables.calendars {
        sqlx::query(
            "INSERT INTO calendars
             (service_id, monday, tuesday, wednesday, thursday, friday, saturday, sunday,
              start_date, end_date)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&c.service_id)
        .bind(c.days[0])
        .bind(c.days[1])
        .bind(c.days[2])
        .bind(c.days[3])
        .bind(c.days[4])
        .bind(c.days[5])
        .bind(c.days[6])
        .bind(&c.start_date)
        .bind(&c.end_date)
        .execute(&mut *tx)
        .await?;
    }
    info!(rows = tables.calendars.len(), table = "calendars", "Loaded static table");

    for e in &tables.calendar_exceptions {
        sqlx::query(
            "INSERT OR REPLACE INTO calendar_exceptions (service_id, date, exception_type)
             VALUES (?, ?, ?)",
        )
        .bind(&e.service_id)
        .bind(&e.date)
        .bind(e.exception_type)
        .execute(&mut *tx)
        .await?;
    }
    info!(
        rows = tables.calendar_exceptions.len(),
        table = "calendar_exceptions",
        "Loaded static table"
    );

    for s in &tables.stops {
        sqlx::query(
            "INSERT INTO stops (stop_id, stop_name, platform_name, lat, lon, parent_station)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&s.stop_id)
        .bind(&s.name)
        .bind(&s.platform_name)
        .bind(s.lat)
        .bind(s.lon)
        .bind(&s.parent_station)
        .execute(&mut *tx)
        .await?;
    }
    info!(rows = tables.stops.len(), table = "stops", "Loaded static table");

    for r in &tables.routes {
        sqlx::query(
            "INSERT INTO routes
             (route_id, agency_id, route_short_name, route_long_name, route_type,
              route_color, route_text_color)
             VALUES (?, (SELECT agency_id FROM agencies WHERE agency_id = ?), ?, ?, ?, ?, ?)",
        )
        .bind(&r.route_id)
        .bind(&r.agency_id)
        .bind(&r.short_name)
        .bind(&r.long_name)
        .bind(r.route_type)
        .bind(&r.color)
        .bind(&r.text_color)
        .execute(&mut *tx)
        .await?;
    }
    info!(rows = tables.routes.len(), table = "routes", "Loaded static table");

    let shape_ids = tables.shape_ids();
    for id in &shape_ids {
        sqlx::query("INSERT INTO shapes (shape_id) VALUES (?)")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    info!(rows = shape_ids.len(), table = "shapes", "Loaded static table");

    for p in &tables.shape_points {
        sqlx::query(
            "INSERT INTO shape_points (shape_id, lat, lon, sequence) VALUES (?, ?, ?, ?)",
        )
        .bind(&p.shape_id)
        .bind(p.lat)
        .bind(p.lon)
        .bind(p.sequence)
        .execute(&mut *tx)
        .await?;
    }
    info!(rows = tables.shape_points.len(), table = "shape_points", "Loaded static table");

    for t in &tables.trips {
        // Shape reference resolved through a subquery so a trip pointing at a
        // shape absent from shapes.txt degrades to NULL instead of failing.
        sqlx::query(
            "INSERT INTO trips
             (trip_id, route_id, service_id, trip_headsign, direction_id, shape_id)
             VALUES (?, ?, ?, ?, ?, (SELECT shape_id FROM shapes WHERE shape_id = ?))",
        )
        .bind(&t.trip_id)
        .bind(&t.route_id)
        .bind(&t.service_id)
        .bind(&t.headsign)
        .bind(t.direction_id)
        .bind(&t.shape_id)
        .execute(&mut *tx)
        .await?;
    }
    info!(rows = tables.trips.len(), table = "trips", "Loaded static table");

    for m in &tables.multi_route_trips {
        sqlx::query("INSERT INTO multi_route_trips (added_route_id, trip_id) VALUES (?, ?)")
            .bind(&m.added_route_id)
            .bind(&m.trip_id)
            .execute(&mut *tx)
            .await?;
    }
    info!(
        rows = tables.multi_route_trips.len(),
        table = "multi_route_trips",
        "Loaded static table"
    );

    for st in &tables.stop_times {
        sqlx::query(
            "INSERT INTO stop_times (trip_id, arrival_time, departure_time, stop_id, stop_sequence)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&st.trip_id)
        .bind(&st.arrival_time)
        .bind(&st.departure_time)
        .bind(&st.stop_id)
        .bind(st.stop_sequence)
        .execute(&mut *tx)
        .await?;
    }
    info!(rows = tables.stop_times.len(), table = "stop_times", "Loaded static table");

    for d in &tables.linked_datasets {
        sqlx::query(
            "INSERT INTO linked_datasets
             (url, trip_updates, vehicle_positions, service_alerts, authentication_type)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&d.url)
        .bind(d.trip_updates)
        .bind(d.vehicle_positions)
        .bind(d.service_alerts)
        .bind(d.authentication_type)
        .execute(&mut *tx)
        .await?;
    }
    info!(
        rows = tables.linked_datasets.len(),
        table = "linked_datasets",
        "Loaded static table"
    );

    for f in &tables.facilities {
        sqlx::query(
            "INSERT INTO facilities
             (facility_id, facility_type, stop_id, facility_short_name, facility_long_name,
              lat, lon)
             VALUES (?, ?, (SELECT stop_id FROM stops WHERE stop_id = ?), ?, ?, ?, ?)",
        )
        .bind(&f.facility_id)
        .bind(&f.facility_type)
        .bind(&f.stop_id)
        .bind(&f.short_name)
        .bind(&f.long_name)
        .bind(f.lat)
        .bind(f.lon)
        .execute(&mut *tx)
        .await?;
    }
    info!(rows = tables.facilities.len(), table = "facilities", "Loaded static table");

    for p in &tables.facility_properties {
        sqlx::query(
            "INSERT INTO facility_properties (facility_id, property_id, value) VALUES (?, ?, ?)",
        )
        .bind(&p.facility_id)
        .bind(&p.property_id)
        .bind(&p.value)
        .execute(&mut *tx)
        .await?;
    }
    info!(
        rows = tables.facility_properties.len(),
        table = "facility_properties",
        "Loaded static table"
    );

    for t in &tables.transfers {
        sqlx::query(
            "INSERT INTO transfers
             (from_stop_id, to_stop_id, transfer_type, min_transfer_time, from_trip_id, to_trip_id)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&t.from_stop_id)
        .bind(&t.to_stop_id)
        .bind(t.transfer_type)
        .bind(t.min_transfer_time)
        .bind(&t.from_trip_id)
        .bind(&t.to_trip_id)
        .execute(&mut *tx)
        .await?;
    }
    info!(rows = tables.transfers.len(), table = "transfers", "Loaded static table");

    tx.commit().await?;
    Ok(())
}
