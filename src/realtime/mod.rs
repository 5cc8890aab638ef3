//! Live feed ingestion.
//!
//! Three protobuf feeds (vehicle positions, trip updates, alerts) are polled
//! on independent cadences. Each poll decodes the feed, flattens it into row
//! structs, and replaces the corresponding live table wholesale. A feed that
//! fails to fetch or decode leaves the previous snapshot in place.

pub mod decode;
pub mod replace;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::Store;
use crate::error::EngineError;

/// A flattened vehicle position, one row per vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRow {
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
    /// Position timestamp, epoch seconds. Defaults to the feed header's.
    pub updated_at: i64,
}

/// One predicted stop event, flattened from trip update x stop time update.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub prediction_id: i64,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub stop_id: Option<String>,
    pub stop_sequence: Option<i64>,
    pub arrival_time: Option<i64>,
    pub departure_time: Option<i64>,
    pub schedule_relationship: Option<i32>,
    pub vehicle_id: Option<String>,
}

/// One alert row per (informed entity, active period) pair. Enum-valued
/// fields keep their raw wire numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRow {
    pub alert_id: String,
    pub cause: Option<i32>,
    pub effect: Option<i32>,
    pub severity: Option<i32>,
    pub header: Option<String>,
    pub description: Option<String>,
    pub route_id: Option<String>,
    pub route_type: Option<i32>,
    pub trip_id: Option<String>,
    pub stop_id: Option<String>,
    pub active_period_start: Option<i64>,
    pub active_period_end: Option<i64>,
}

/// Which of the three live feeds a dataset registration provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    VehiclePositions,
    TripUpdates,
    Alerts,
}

impl FeedKind {
    fn flag_column(&self) -> &'static str {
        match self {
            FeedKind::VehiclePositions => "vehicle_positions",
            FeedKind::TripUpdates => "trip_updates",
            FeedKind::Alerts => "service_alerts",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FeedKind::VehiclePositions => "vehicle_positions",
            FeedKind::TripUpdates => "trip_updates",
            FeedKind::Alerts => "alerts",
        }
    }
}

/// Look up the registered URL for a feed kind. The schedule's dataset table
/// is the source of truth; no registration means the feed is simply skipped.
pub async fn feed_url(store: &Store, kind: FeedKind) -> Result<Option<String>, EngineError> {
    let row: Option<(String,)> = sqlx::query_as(&format!(
        "SELECT url FROM linked_datasets WHERE {} = 1 LIMIT 1",
        kind.flag_column()
    ))
    .fetch_optional(store.read_pool())
    .await?;
    Ok(row.map(|(url,)| url))
}

/// Remembers the last feed header timestamp seen per feed so an unchanged
/// upstream snapshot is not re-written. A static reload invalidates it, since
/// the dataset registrations themselves may have changed.
#[derive(Clone, Default)]
pub struct FeedCache {
    seen: Arc<RwLock<HashMap<FeedKind, u64>>>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the feed's header timestamp matches the one last ingested.
    pub async fn is_unchanged(&self, kind: FeedKind, header_timestamp: Option<u64>) -> bool {
        let Some(ts) = header_timestamp else {
            return false;
        };
        self.seen.read().await.get(&kind) == Some(&ts)
    }

    pub async fn record(&self, kind: FeedKind, header_timestamp: Option<u64>) {
        if let Some(ts) = header_timestamp {
            self.seen.write().await.insert(kind, ts);
        }
    }

    /// Forget everything. Called after each full static reload.
    pub async fn invalidate(&self) {
        self.seen.write().await.clear();
        info!("Invalidated live feed cache");
    }
}

/// Poll the vehicle positions feed and replace the vehicles table.
pub async fn refresh_vehicles(
    store: &Store,
    client: &reqwest::Client,
    cache: &FeedCache,
    config: &Config,
) -> Result<(), EngineError> {
    let Some(url) = feed_url(store, FeedKind::VehiclePositions).await? else {
        debug!("No vehicle positions feed registered");
        return Ok(());
    };

    let feed = decode::fetch_feed(client, &url, config.api_key.as_deref()).await?;
    if cache.is_unchanged(FeedKind::VehiclePositions, feed.header.timestamp).await {
        debug!("Vehicle positions feed unchanged, skipping replace");
        return Ok(());
    }

    let now = chrono::Utc::now().timestamp();
    let rows = decode::flatten_vehicles(&feed, now, config.refresh.stale_position_secs as i64);
    replace::replace_vehicles(store.write_pool(), &rows).await?;
    cache.record(FeedKind::VehiclePositions, feed.header.timestamp).await;

    info!(vehicles = rows.len(), "Refreshed vehicle positions");
    Ok(())
}

/// Poll the trip updates feed and replace the predictions table.
pub async fn refresh_predictions(
    store: &Store,
    client: &reqwest::Client,
    cache: &FeedCache,
    config: &Config,
) -> Result<(), EngineError> {
    let Some(url) = feed_url(store, FeedKind::TripUpdates).await? else {
        debug!("No trip updates feed registered");
        return Ok(());
    };

    let feed = decode::fetch_feed(client, &url, config.api_key.as_deref()).await?;
    if cache.is_unchanged(FeedKind::TripUpdates, feed.header.timestamp).await {
        debug!("Trip updates feed unchanged, skipping replace");
        return Ok(());
    }

    let rows = decode::flatten_predictions(&feed);
    replace::replace_predictions(store.write_pool(), &rows).await?;
    cache.record(FeedKind::TripUpdates, feed.header.timestamp).await;

    info!(predictions = rows.len(), "Refreshed predictions");
    Ok(())
}

/// Poll the alerts feed and replace the alerts table.
pub async fn refresh_alerts(
    store: &Store,
    client: &reqwest::Client,
    cache: &FeedCache,
    config: &Config,
) -> Result<(), EngineError> {
    let Some(url) = feed_url(store, FeedKind::Alerts).await? else {
        debug!("No alerts feed registered");
        return Ok(());
    };

    let feed = decode::fetch_feed(client, &url, config.api_key.as_deref()).await?;
    if cache.is_unchanged(FeedKind::Alerts, feed.header.timestamp).await {
        debug!("Alerts feed unchanged, skipping replace");
        return Ok(());
    }

    let rows = decode::flatten_alerts(&feed);
    replace::replace_alerts(store.write_pool(), &rows).await?;
    cache.record(FeedKind::Alerts, feed.header.timestamp).await;

    info!(alert_rows = rows.len(), "Refreshed alerts");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::schedule::tables::{LinkedDatasetRow, StaticTables};

    #[tokio::test]
    async fn feed_url_honors_flag_columns() {
        let store = Store::open_in_memory().await.unwrap();
        schema::recreate_static_tables(store.write_pool()).await.unwrap();
        let fixture = StaticTables {
            linked_datasets: vec![
                LinkedDatasetRow {
                    url: "https://example.com/VehiclePositions.pb".into(),
                    trip_updates: false,
                    vehicle_positions: true,
                    service_alerts: false,
                    authentication_type: Some(0),
                },
                LinkedDatasetRow {
                    url: "https://example.com/TripUpdates.pb".into(),
                    trip_updates: true,
                    vehicle_positions: false,
                    service_alerts: false,
                    authentication_type: Some(0),
                },
            ],
            ..Default::default()
        };
        crate::schedule::tables::insert_all(store.write_pool(), &fixture)
            .await
            .unwrap();

        let url = feed_url(&store, FeedKind::VehiclePositions).await.unwrap();
        assert_eq!(url.as_deref(), Some("https://example.com/VehiclePositions.pb"));
        let url = feed_url(&store, FeedKind::TripUpdates).await.unwrap();
        assert_eq!(url.as_deref(), Some("https://example.com/TripUpdates.pb"));
        let url = feed_url(&store, FeedKind::Alerts).await.unwrap();
        assert!(url.is_none());
    }

    #[tokio::test]
    async fn feed_cache_tracks_header_timestamps() {
        let cache = FeedCache::new();
        assert!(!cache.is_unchanged(FeedKind::Alerts, Some(100)).await);

        cache.record(FeedKind::Alerts, Some(100)).await;
        assert!(cache.is_unchanged(FeedKind::Alerts, Some(100)).await);
        assert!(!cache.is_unchanged(FeedKind::Alerts, Some(101)).await);
        // A missing header timestamp never counts as unchanged.
        assert!(!cache.is_unchanged(FeedKind::Alerts, None).await);

        cache.invalidate().await;
        assert!(!cache.is_unchanged(FeedKind::Alerts, Some(100)).await);
    }
}
