//! Schema management for the schedule snapshot.
//!
//! Static tables are dropped and recreated on every full reload; live tables
//! are created once and only ever have their rows replaced wholesale.

use sqlx::SqlitePool;

use crate::error::EngineError;

/// Static tables in FK-safe creation order. Drop order is the reverse.
const STATIC_TABLES: &[(&str, &str)] = &[
    (
        "agencies",
        "CREATE TABLE agencies (
            agency_id TEXT PRIMARY KEY,
            agency_name TEXT,
            agency_url TEXT,
            agency_timezone TEXT
        )",
    ),
    (
        "calendars",
        "CREATE TABLE calendars (
            service_id TEXT PRIMARY KEY,
            monday INTEGER NOT NULL DEFAULT 0,
            tuesday INTEGER NOT NULL DEFAULT 0,
            wednesday INTEGER NOT NULL DEFAULT 0,
            thursday INTEGER NOT NULL DEFAULT 0,
            friday INTEGER NOT NULL DEFAULT 0,
            saturday INTEGER NOT NULL DEFAULT 0,
            sunday INTEGER NOT NULL DEFAULT 0,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL
        )",
    ),
    (
        "calendar_exceptions",
        "CREATE TABLE calendar_exceptions (
            service_id TEXT NOT NULL,
            date TEXT NOT NULL,
            exception_type INTEGER NOT NULL,
            PRIMARY KEY (service_id, date)
        )",
    ),
    (
        "stops",
        "CREATE TABLE stops (
            stop_id TEXT PRIMARY KEY,
            stop_name TEXT,
            platform_name TEXT,
            lat REAL,
            lon REAL,
            parent_station TEXT
        )",
    ),
    (
        "routes",
        "CREATE TABLE routes (
            route_id TEXT PRIMARY KEY,
            agency_id TEXT REFERENCES agencies(agency_id),
            route_short_name TEXT,
            route_long_name TEXT,
            route_type INTEGER NOT NULL,
            route_color TEXT,
            route_text_color TEXT
        )",
    ),
    (
        "shapes",
        "CREATE TABLE shapes (
            shape_id TEXT PRIMARY KEY
        )",
    ),
    (
        "shape_points",
        "CREATE TABLE shape_points (
            shape_id TEXT NOT NULL REFERENCES shapes(shape_id),
            lat REAL NOT NULL,
            lon REAL NOT NULL,
            sequence INTEGER NOT NULL,
            PRIMARY KEY (shape_id, sequence)
        )",
    ),
    (
        "trips",
        "CREATE TABLE trips (
            trip_id TEXT PRIMARY KEY,
            route_id TEXT NOT NULL REFERENCES routes(route_id),
            service_id TEXT NOT NULL REFERENCES calendars(service_id),
            trip_headsign TEXT,
            direction_id INTEGER,
            shape_id TEXT REFERENCES shapes(shape_id)
        )",
    ),
    (
        "multi_route_trips",
        "CREATE TABLE multi_route_trips (
            added_route_id TEXT NOT NULL REFERENCES routes(route_id),
            trip_id TEXT NOT NULL REFERENCES trips(trip_id),
            PRIMARY KEY (added_route_id, trip_id)
        )",
    ),
    (
        "stop_times",
        "CREATE TABLE stop_times (
            trip_id TEXT NOT NULL REFERENCES trips(trip_id),
            arrival_time TEXT,
            departure_time TEXT,
            stop_id TEXT NOT NULL REFERENCES stops(stop_id),
            stop_sequence INTEGER NOT NULL,
            PRIMARY KEY (trip_id, stop_sequence)
        )",
    ),
    (
        "linked_datasets",
        "CREATE TABLE linked_datasets (
            url TEXT PRIMARY KEY,
            trip_updates INTEGER NOT NULL DEFAULT 0,
            vehicle_positions INTEGER NOT NULL DEFAULT 0,
            service_alerts INTEGER NOT NULL DEFAULT 0,
            authentication_type INTEGER
        )",
    ),
    (
        "facilities",
        "CREATE TABLE facilities (
            facility_id TEXT PRIMARY KEY,
            facility_type TEXT NOT NULL,
            stop_id TEXT REFERENCES stops(stop_id),
            facility_short_name TEXT,
            facility_long_name TEXT,
            lat REAL,
            lon REAL
        )",
    ),
    (
        "facility_properties",
        "CREATE TABLE facility_properties (
            facility_id TEXT NOT NULL REFERENCES facilities(facility_id),
            property_id TEXT NOT NULL,
            value TEXT
        )",
    ),
    (
        "transfers",
        "CREATE TABLE transfers (
            from_stop_id TEXT REFERENCES stops(stop_id),
            to_stop_id TEXT REFERENCES stops(stop_id),
            transfer_type INTEGER,
            min_transfer_time INTEGER,
            from_trip_id TEXT,
            to_trip_id TEXT
        )",
    ),
];

const LIVE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS vehicles (
        vehicle_id TEXT PRIMARY KEY,
        label TEXT,
        trip_id TEXT,
        route_id TEXT,
        stop_id TEXT,
        stop_sequence INTEGER,
        current_status INTEGER,
        lat REAL,
        lon REAL,
        bearing REAL,
        speed REAL,
        occupancy_status INTEGER,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS predictions (
        prediction_id INTEGER PRIMARY KEY,
        trip_id TEXT,
        route_id TEXT,
        stop_id TEXT,
        stop_sequence INTEGER,
        arrival_time INTEGER,
        departure_time INTEGER,
        schedule_relationship INTEGER,
        vehicle_id TEXT
    )",
    "CREATE TABLE IF NOT EXISTS alerts (
        alert_id TEXT NOT NULL,
        cause INTEGER,
        effect INTEGER,
        severity INTEGER,
        header TEXT,
        description TEXT,
        route_id TEXT,
        route_type INTEGER,
        trip_id TEXT,
        stop_id TEXT,
        active_period_start INTEGER,
        active_period_end INTEGER
    )",
];

/// Drop and recreate every static table. Failure here is fatal.
pub async fn recreate_static_tables(pool: &SqlitePool) -> Result<(), EngineError> {
    for (name, _) in STATIC_TABLES.iter().rev() {
        sqlx::query(&format!("DROP TABLE IF EXISTS {name}"))
            .execute(pool)
            .await?;
    }
    for (_, ddl) in STATIC_TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

/// Create the live tables if they do not exist. Never drops existing rows, so
/// a static reload leaves the previous live snapshot untouched.
pub async fn ensure_live_tables(pool: &SqlitePool) -> Result<(), EngineError> {
    for ddl in LIVE_TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;

    #[tokio::test]
    async fn recreate_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        recreate_static_tables(store.write_pool()).await.unwrap();
        sqlx::query("INSERT INTO agencies (agency_id, agency_name) VALUES ('1', 'MBTA')")
            .execute(store.write_pool())
            .await
            .unwrap();

        // Recreating drops everything and starts fresh.
        recreate_static_tables(store.write_pool()).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agencies")
            .fetch_one(store.read_pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn live_tables_survive_static_recreate() {
        let store = Store::open_in_memory().await.unwrap();
        recreate_static_tables(store.write_pool()).await.unwrap();
        ensure_live_tables(store.write_pool()).await.unwrap();
        sqlx::query("INSERT INTO vehicles (vehicle_id, updated_at) VALUES ('v1', 100)")
            .execute(store.write_pool())
            .await
            .unwrap();

        recreate_static_tables(store.write_pool()).await.unwrap();
        ensure_live_tables(store.write_pool()).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vehicles")
            .fetch_one(store.read_pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
