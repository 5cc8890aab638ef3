//! Wholesale replacement of the live tables.
//!
//! Each replacement runs as a single transaction: delete everything, insert
//! the new rows, commit. Readers see either the old snapshot or the new one.
//! SQLite busy/locked errors get a bounded fixed-delay retry.

use sqlx::SqlitePool;
use tracing::warn;

use crate::error::EngineError;

use super::{AlertRow, PredictionRow, VehicleRow};

const REPLACE_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;

async fn try_replace_vehicles(pool: &SqlitePool, rows: &[VehicleRow]) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM vehicles").execute(&mut *tx).await?;
    for v in rows {
        sqlx::query(
            "INSERT INTO vehicles
             (vehicle_id, label, trip_id, route_id, stop_id, stop_sequence, current_status,
              lat, lon, bearing, speed, occupancy_status, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&v.vehicle_id)
        .bind(&v.label)
        .bind(&v.trip_id)
        .bind(&v.route_id)
        .bind(&v.stop_id)
        .bind(v.stop_sequence)
        .bind(v.current_status)
        .bind(v.lat)
        .bind(v.lon)
        .bind(v.bearing)
        .bind(v.speed)
        .bind(v.occupancy_status)
        .bind(v.updated_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn try_replace_predictions(
    pool: &SqlitePool,
    rows: &[PredictionRow],
) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM predictions").execute(&mut *tx).await?;
    for p in rows {
        sqlx::query(
            "INSERT INTO predictions
             (prediction_id, trip_id, route_id, stop_id, stop_sequence, arrival_time,
              departure_time, schedule_relationship, vehicle_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(p.prediction_id)
        .bind(&p.trip_id)
        .bind(&p.route_id)
        .bind(&p.stop_id)
        .bind(p.stop_sequence)
        .bind(p.arrival_time)
        .bind(p.departure_time)
        .bind(p.schedule_relationship)
        .bind(&p.vehicle_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn try_replace_alerts(pool: &SqlitePool, rows: &[AlertRow]) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM alerts").execute(&mut *tx).await?;
    for a in rows {
        sqlx::query(
            "INSERT INTO alerts
             (alert_id, cause, effect, severity, header, description, route_id, route_type,
              trip_id, stop_id, active_period_start, active_period_end)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&a.alert_id)
        .bind(a.cause)
        .bind(a.effect)
        .bind(a.severity)
        .bind(&a.header)
        .bind(&a.description)
        .bind(&a.route_id)
        .bind(a.route_type)
        .bind(&a.trip_id)
        .bind(&a.stop_id)
        .bind(a.active_period_start)
        .bind(a.active_period_end)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

macro_rules! with_contention_retry {
    ($table:literal, $attempt_expr:expr) => {{
        let mut attempt = 1u32;
        loop {
            match $attempt_expr.await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_store_contention() && attempt < REPLACE_ATTEMPTS => {
                    warn!(attempt, table = $table, error = %e, "Store busy during replace, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(RETRY_DELAY_MS)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }};
}

pub async fn replace_vehicles(pool: &SqlitePool, rows: &[VehicleRow]) -> Result<(), EngineError> {
    with_contention_retry!("vehicles", try_replace_vehicles(pool, rows))
}

pub async fn replace_predictions(
    pool: &SqlitePool,
    rows: &[PredictionRow],
) -> Result<(), EngineError> {
    with_contention_retry!("predictions", try_replace_predictions(pool, rows))
}

pub async fn replace_alerts(pool: &SqlitePool, rows: &[AlertRow]) -> Result<(), EngineError> {
    with_contention_retry!("alerts", try_replace_alerts(pool, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{schema, Store};

    fn vehicle(id: &str, updated_at: i64) -> VehicleRow {
        VehicleRow {
            vehicle_id: id.to_string(),
            label: None,
            trip_id: None,
            route_id: None,
            stop_id: None,
            stop_sequence: None,
            current_status: None,
            lat: Some(42.36),
            lon: Some(-71.06),
            bearing: None,
            speed: None,
            occupancy_status: None,
            updated_at,
        }
    }

    #[tokio::test]
    async fn replace_is_wholesale() {
        let store = Store::open_in_memory().await.unwrap();
        schema::ensure_live_tables(store.write_pool()).await.unwrap();

        replace_vehicles(
            store.write_pool(),
            &[vehicle("v1", 100), vehicle("v2", 100)],
        )
        .await
        .unwrap();

        // The next snapshot drops v2 entirely.
        replace_vehicles(store.write_pool(), &[vehicle("v1", 200)]).await.unwrap();

        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT vehicle_id, updated_at FROM vehicles")
                .fetch_all(store.read_pool())
                .await
                .unwrap();
        assert_eq!(rows, vec![("v1".to_string(), 200)]);
    }

    #[tokio::test]
    async fn same_batch_twice_replaces_instead_of_accumulating() {
        let store = Store::open_in_memory().await.unwrap();
        schema::ensure_live_tables(store.write_pool()).await.unwrap();

        let batch = [vehicle("v1", 100), vehicle("v2", 100)];
        replace_vehicles(store.write_pool(), &batch).await.unwrap();
        replace_vehicles(store.write_pool(), &batch).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vehicles")
            .fetch_one(store.read_pool())
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn empty_rows_clear_the_table() {
        let store = Store::open_in_memory().await.unwrap();
        schema::ensure_live_tables(store.write_pool()).await.unwrap();

        replace_vehicles(store.write_pool(), &[vehicle("v1", 100)]).await.unwrap();
        replace_vehicles(store.write_pool(), &[]).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vehicles")
            .fetch_one(store.read_pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn alert_rows_round_trip() {
        let store = Store::open_in_memory().await.unwrap();
        schema::ensure_live_tables(store.write_pool()).await.unwrap();

        let rows = vec![AlertRow {
            alert_id: "a1".into(),
            cause: Some(9),
            effect: Some(4),
            severity: Some(3),
            header: Some("Delays".into()),
            description: None,
            route_id: Some("Red".into()),
            route_type: Some(1),
            trip_id: None,
            stop_id: None,
            active_period_start: Some(100),
            active_period_end: None,
        }];
        replace_alerts(store.write_pool(), &rows).await.unwrap();

        let (alert_id, header, end): (String, Option<String>, Option<i64>) = sqlx::query_as(
            "SELECT alert_id, header, active_period_end FROM alerts",
        )
        .fetch_one(store.read_pool())
        .await
        .unwrap();
        assert_eq!(alert_id, "a1");
        assert_eq!(header.as_deref(), Some("Delays"));
        assert!(end.is_none());
    }
}
