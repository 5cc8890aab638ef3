//! Mode-class parameterized query builder.
//!
//! A mode class names an ordered set of route-type codes. The statements for
//! a class are composed once (`ModeQueries::new`) and reused across polls;
//! only the live-entity queries change results between polls, so those are
//! simply re-executed per request.

pub mod filter;

use sqlx::FromRow;
use tracing::debug;

use crate::db::Store;
use crate::error::EngineError;

/// Bus routes that are operationally part of rapid transit (Silver Line)
/// even though their route_type says bus. Shapes only.
pub const SILVER_LINE_ROUTE_IDS: &[&str] = &["741", "742", "743", "746", "749", "751"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeClass {
    LightRail,
    Subway,
    CommuterRail,
    Bus,
    Ferry,
    RapidTransit,
}

impl ModeClass {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "light_rail" => Some(ModeClass::LightRail),
            "subway" => Some(ModeClass::Subway),
            "commuter_rail" => Some(ModeClass::CommuterRail),
            "bus" => Some(ModeClass::Bus),
            "ferry" => Some(ModeClass::Ferry),
            "rapid_transit" => Some(ModeClass::RapidTransit),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModeClass::LightRail => "light_rail",
            ModeClass::Subway => "subway",
            ModeClass::CommuterRail => "commuter_rail",
            ModeClass::Bus => "bus",
            ModeClass::Ferry => "ferry",
            ModeClass::RapidTransit => "rapid_transit",
        }
    }

    pub fn all() -> &'static [ModeClass] {
        &[
            ModeClass::LightRail,
            ModeClass::Subway,
            ModeClass::CommuterRail,
            ModeClass::Bus,
            ModeClass::Ferry,
            ModeClass::RapidTransit,
        ]
    }

    pub fn route_types(&self) -> &'static [i32] {
        match self {
            ModeClass::LightRail => &[0],
            ModeClass::Subway => &[0, 1],
            ModeClass::CommuterRail => &[2],
            ModeClass::Bus => &[3],
            ModeClass::Ferry => &[4],
            // Subway plus light rail.
            ModeClass::RapidTransit => &[0, 1],
        }
    }

    /// Route ids force-included in the shape set regardless of route_type.
    fn forced_shape_route_ids(&self) -> &'static [&'static str] {
        match self {
            ModeClass::RapidTransit => SILVER_LINE_ROUTE_IDS,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct StopRecord {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub platform_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub parent_station: Option<String>,
}

#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct FacilityRecord {
    pub facility_id: String,
    pub facility_type: String,
    pub stop_id: Option<String>,
    pub facility_short_name: Option<String>,
    pub facility_long_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct VehicleRecord {
    pub vehicle_id: String,
    pub label: Option<String>,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub stop_id: Option<String>,
    pub stop_sequence: Option<i64>,
    pub current_status: Option<i32>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub bearing: Option<f64>,
    pub speed: Option<f64>,
    pub occupancy_status: Option<i32>,
    pub updated_at: i64,
}

fn type_list(types: &[i32]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn id_list(ids: &[&str]) -> String {
    ids.iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Predicate selecting trips belonging to the class, including trips reached
/// only through a multi-route "added route" link.
fn in_class_trip_filter(class: ModeClass) -> String {
    let types = type_list(class.route_types());
    format!(
        "(trips.route_id IN (SELECT route_id FROM routes WHERE route_type IN ({types}))
          OR trips.trip_id IN (
              SELECT trip_id FROM multi_route_trips
              WHERE added_route_id IN (SELECT route_id FROM routes WHERE route_type IN ({types}))))"
    )
}

/// Reusable statements for one mode class.
pub struct ModeQueries {
    class: ModeClass,
    stops_sql: String,
    parent_stations_sql: String,
    shape_ids_sql: String,
    parking_sql: String,
    vehicles_sql: String,
}

impl ModeQueries {
    pub fn new(class: ModeClass) -> Self {
        let trip_filter = in_class_trip_filter(class);
        let types = type_list(class.route_types());

        let stops_sql = format!(
            "SELECT DISTINCT stops.stop_id, stops.stop_name, stops.platform_name,
                    stops.lat, stops.lon, stops.parent_station
             FROM stops
             JOIN stop_times ON stop_times.stop_id = stops.stop_id
             JOIN trips ON trips.trip_id = stop_times.trip_id
             WHERE {trip_filter}
             ORDER BY stops.stop_id"
        );

        let parent_stations_sql = format!(
            "SELECT DISTINCT p.stop_id, p.stop_name, p.platform_name,
                    p.lat, p.lon, p.parent_station
             FROM stops p
             JOIN stops child ON child.parent_station = p.stop_id
             JOIN stop_times ON stop_times.stop_id = child.stop_id
             JOIN trips ON trips.trip_id = stop_times.trip_id
             WHERE {trip_filter}
             ORDER BY p.stop_id"
        );

        // Descending shape-id order keeps newer overlay shapes drawn on top.
        let forced = class.forced_shape_route_ids();
        let shape_filter = if forced.is_empty() {
            trip_filter.clone()
        } else {
            format!(
                "({trip_filter} OR trips.route_id IN ({}))",
                id_list(forced)
            )
        };
        let shape_ids_sql = format!(
            "SELECT DISTINCT trips.shape_id FROM trips
             WHERE trips.shape_id IS NOT NULL AND {shape_filter}
             ORDER BY trips.shape_id DESC"
        );

        // Parking lives on parent stations, so the stop set is expanded with
        // parents. Ferry docks carry their lots directly, no parent hop.
        let parking_sql = if class == ModeClass::Ferry {
            format!(
                "SELECT DISTINCT f.facility_id, f.facility_type, f.stop_id,
                        f.facility_short_name, f.facility_long_name, f.lat, f.lon
                 FROM facilities f
                 WHERE f.facility_type = 'parking-area' AND f.stop_id IN (
                     SELECT stop_times.stop_id FROM stop_times
                     JOIN trips ON trips.trip_id = stop_times.trip_id
                     WHERE {trip_filter})
                 ORDER BY f.facility_id"
            )
        } else {
            format!(
                "SELECT DISTINCT f.facility_id, f.facility_type, f.stop_id,
                        f.facility_short_name, f.facility_long_name, f.lat, f.lon
                 FROM facilities f
                 WHERE f.facility_type = 'parking-area' AND f.stop_id IN (
                     SELECT stops.stop_id FROM stops
                     JOIN stop_times ON stop_times.stop_id = stops.stop_id
                     JOIN trips ON trips.trip_id = stop_times.trip_id
                     WHERE {trip_filter}
                     UNION
                     SELECT stops.parent_station FROM stops
                     JOIN stop_times ON stop_times.stop_id = stops.stop_id
                     JOIN trips ON trips.trip_id = stop_times.trip_id
                     WHERE {trip_filter} AND stops.parent_station IS NOT NULL)
                 ORDER BY f.facility_id"
            )
        };

        let vehicles_sql = format!(
            "SELECT vehicle_id, label, trip_id, route_id, stop_id, stop_sequence,
                    current_status, lat, lon, bearing, speed, occupancy_status, updated_at
             FROM vehicles
             WHERE route_id IN (SELECT route_id FROM routes WHERE route_type IN ({types}))
             ORDER BY vehicle_id"
        );

        debug!(class = class.name(), "Built mode-class statements");
        Self {
            class,
            stops_sql,
            parent_stations_sql,
            shape_ids_sql,
            parking_sql,
            vehicles_sql,
        }
    }

    pub fn class(&self) -> ModeClass {
        self.class
    }

    /// All platform stops served by in-class trips.
    pub async fn stops(&self, store: &Store) -> Result<Vec<StopRecord>, EngineError> {
        Ok(sqlx::query_as(&self.stops_sql)
            .fetch_all(store.read_pool())
            .await?)
    }

    /// Distinct parent stations of the served stops.
    pub async fn parent_stations(&self, store: &Store) -> Result<Vec<StopRecord>, EngineError> {
        Ok(sqlx::query_as(&self.parent_stations_sql)
            .fetch_all(store.read_pool())
            .await?)
    }

    /// Distinct shape ids for in-class trips, newest-id first.
    pub async fn shape_ids(&self, store: &Store) -> Result<Vec<String>, EngineError> {
        let rows: Vec<(String,)> = sqlx::query_as(&self.shape_ids_sql)
            .fetch_all(store.read_pool())
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Parking facilities attached to the class's stop set.
    pub async fn parking(&self, store: &Store) -> Result<Vec<FacilityRecord>, EngineError> {
        Ok(sqlx::query_as(&self.parking_sql)
            .fetch_all(store.read_pool())
            .await?)
    }

    /// Live vehicles on in-class routes. Re-executed per request.
    pub async fn vehicles(&self, store: &Store) -> Result<Vec<VehicleRecord>, EngineError> {
        Ok(sqlx::query_as(&self.vehicles_sql)
            .fetch_all(store.read_pool())
            .await?)
    }
}
