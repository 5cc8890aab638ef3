//! GeoJSON feature assembly and per-mode-class export.
//!
//! Stops, shapes, and parking are static layers exported to files on each
//! reload; vehicles are assembled per request, joined with their current
//! predictions and given an interpolated bearing when the feed reported
//! none.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value as GeoValue};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RefreshConfig;
use crate::db::Store;
use crate::derive::{bearing, delay};
use crate::error::EngineError;
use crate::query::{FacilityRecord, ModeClass, ModeQueries, StopRecord, VehicleRecord};

/// Anything that can render itself as a GeoJSON feature. Returns None when
/// the record has no usable coordinates.
pub trait Geospatial {
    fn to_feature(&self) -> Option<Feature>;
}

fn point_feature(id: String, lat: f64, lon: f64, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(GeoValue::Point(vec![lon, lat]))),
        id: Some(geojson::feature::Id::String(id)),
        properties: Some(properties),
        foreign_members: None,
    }
}

impl Geospatial for StopRecord {
    fn to_feature(&self) -> Option<Feature> {
        let (lat, lon) = (self.lat?, self.lon?);
        let mut props = JsonObject::new();
        props.insert("name".into(), serde_json::json!(self.stop_name));
        props.insert("platform_name".into(), serde_json::json!(self.platform_name));
        props.insert("parent_station".into(), serde_json::json!(self.parent_station));
        Some(point_feature(self.stop_id.clone(), lat, lon, props))
    }
}

impl Geospatial for FacilityRecord {
    fn to_feature(&self) -> Option<Feature> {
        let (lat, lon) = (self.lat?, self.lon?);
        let mut props = JsonObject::new();
        props.insert("facility_type".into(), serde_json::json!(self.facility_type));
        props.insert("stop_id".into(), serde_json::json!(self.stop_id));
        props.insert("name".into(), serde_json::json!(self.facility_long_name.as_ref().or(self.facility_short_name.as_ref())));
        Some(point_feature(self.facility_id.clone(), lat, lon, props))
    }
}

/// Shape geometry cache: shape id to its ordered (lat, lon) path. Filled
/// lazily from the store, cleared after each static reload.
#[derive(Clone, Default)]
pub struct ShapeCache {
    inner: Arc<RwLock<HashMap<String, Arc<Vec<(f64, f64)>>>>>,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn path(
        &self,
        store: &Store,
        shape_id: &str,
    ) -> Result<Arc<Vec<(f64, f64)>>, EngineError> {
        if let Some(path) = self.inner.read().await.get(shape_id) {
            return Ok(path.clone());
        }

        let rows: Vec<(f64, f64)> = sqlx::query_as(
            "SELECT lat, lon FROM shape_points WHERE shape_id = ? ORDER BY sequence",
        )
        .bind(shape_id)
        .fetch_all(store.read_pool())
        .await?;

        let path = Arc::new(rows);
        self.inner
            .write()
            .await
            .insert(shape_id.to_string(), path.clone());
        Ok(path)
    }

    pub async fn invalidate(&self) {
        self.inner.write().await.clear();
        debug!("Invalidated shape geometry cache");
    }
}

/// Assembles feature collections per mode class and writes the static layers
/// to disk. Statements are built once per class and reused.
pub struct FeatureService {
    store: Store,
    shapes: ShapeCache,
    queries: HashMap<ModeClass, ModeQueries>,
    timezone: chrono_tz::Tz,
    assembly_attempts: u32,
    assembly_sleep_ms: u64,
}

impl FeatureService {
    pub fn new(store: Store, refresh: &RefreshConfig, timezone: chrono_tz::Tz) -> Self {
        let queries = ModeClass::all()
            .iter()
            .map(|&class| (class, ModeQueries::new(class)))
            .collect();
        Self {
            store,
            shapes: ShapeCache::new(),
            queries,
            timezone,
            assembly_attempts: refresh.assembly_attempts,
            assembly_sleep_ms: refresh.assembly_sleep_ms,
        }
    }

    fn queries(&self, class: ModeClass) -> &ModeQueries {
        // The map is total over ModeClass::all().
        &self.queries[&class]
    }

    /// Called after each successful static reload.
    pub async fn invalidate(&self) {
        self.shapes.invalidate().await;
    }

    /// Stop features for a class: the parent stations, plus served stops
    /// that have no parent (surface stops).
    pub async fn stop_features(&self, class: ModeClass) -> Result<FeatureCollection, EngineError> {
        let queries = self.queries(class);
        let parents = queries.parent_stations(&self.store).await?;
        let stops = queries.stops(&self.store).await?;

        let mut features: Vec<Feature> = parents.iter().filter_map(|s| s.to_feature()).collect();
        features.extend(
            stops
                .iter()
                .filter(|s| s.parent_station.is_none())
                .filter_map(|s| s.to_feature()),
        );
        Ok(collection(features))
    }

    /// One LineString feature per distinct shape, newest shape id first.
    pub async fn shape_features(&self, class: ModeClass) -> Result<FeatureCollection, EngineError> {
        let shape_ids = self.queries(class).shape_ids(&self.store).await?;
        let mut features = Vec::with_capacity(shape_ids.len());
        for shape_id in shape_ids {
            let path = self.shapes.path(&self.store, &shape_id).await?;
            if path.len() < 2 {
                continue;
            }
            let line: Vec<Vec<f64>> = path.iter().map(|(lat, lon)| vec![*lon, *lat]).collect();
            features.push(Feature {
                bbox: None,
                geometry: Some(Geometry::new(GeoValue::LineString(line))),
                id: Some(geojson::feature::Id::String(shape_id)),
                properties: Some(JsonObject::new()),
                foreign_members: None,
            });
        }
        Ok(collection(features))
    }

    pub async fn parking_features(
        &self,
        class: ModeClass,
    ) -> Result<FeatureCollection, EngineError> {
        let facilities = self.queries(class).parking(&self.store).await?;
        Ok(collection(
            facilities.iter().filter_map(|f| f.to_feature()).collect(),
        ))
    }

    /// Vehicles with their current predictions. Because vehicle and
    /// prediction polls run on independent cadences, this retries up to the
    /// attempt budget until at least one vehicle carries a prediction, then
    /// returns best effort.
    pub async fn vehicle_features(
        &self,
        class: ModeClass,
    ) -> Result<FeatureCollection, EngineError> {
        let queries = self.queries(class);
        let mut vehicles = Vec::new();
        let mut predictions: HashMap<String, Vec<serde_json::Value>> = HashMap::new();

        for attempt in 1..=self.assembly_attempts {
            vehicles = queries.vehicles(&self.store).await?;
            predictions = self.predictions_by_trip(&vehicles).await?;
            if vehicles.is_empty() || !predictions.is_empty() {
                break;
            }
            if attempt == self.assembly_attempts {
                warn!(
                    class = class.name(),
                    attempts = self.assembly_attempts,
                    "No predictions joined to vehicles within attempt budget"
                );
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(self.assembly_sleep_ms)).await;
        }

        let mut features = Vec::with_capacity(vehicles.len());
        for v in &vehicles {
            let Some(feature) = self.vehicle_feature(v, &predictions).await? else {
                continue;
            };
            features.push(feature);
        }
        Ok(collection(features))
    }

    async fn predictions_by_trip(
        &self,
        vehicles: &[VehicleRecord],
    ) -> Result<HashMap<String, Vec<serde_json::Value>>, EngineError> {
        let mut by_trip: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
        if vehicles.is_empty() {
            return Ok(by_trip);
        }

        type PredictionTuple = (
            String,
            Option<String>,
            Option<i64>,
            Option<i64>,
            Option<i64>,
            Option<String>,
        );
        let rows: Vec<PredictionTuple> = sqlx::query_as(
            "SELECT p.trip_id, p.stop_id, p.stop_sequence, p.arrival_time, p.departure_time,
                    st.arrival_time
             FROM predictions p
             LEFT JOIN stop_times st
               ON st.trip_id = p.trip_id AND st.stop_sequence = p.stop_sequence
             WHERE p.trip_id IS NOT NULL",
        )
        .fetch_all(self.store.read_pool())
        .await?;

        for (trip_id, stop_id, stop_sequence, arrival, departure, scheduled) in rows {
            let delay_secs = match (&scheduled, arrival.or(departure)) {
                (Some(s), Some(predicted)) => {
                    delay::prediction_delay_secs(s, self.timezone, predicted)
                }
                _ => None,
            };
            by_trip.entry(trip_id).or_default().push(serde_json::json!({
                "stop_id": stop_id,
                "stop_sequence": stop_sequence,
                "arrival_time": arrival,
                "departure_time": departure,
                "delay_secs": delay_secs,
            }));
        }
        // Keep only predictions for trips a vehicle is actually running.
        let active: std::collections::HashSet<&str> = vehicles
            .iter()
            .filter_map(|v| v.trip_id.as_deref())
            .collect();
        by_trip.retain(|trip_id, _| active.contains(trip_id.as_str()));
        Ok(by_trip)
    }

    async fn vehicle_feature(
        &self,
        v: &VehicleRecord,
        predictions: &HashMap<String, Vec<serde_json::Value>>,
    ) -> Result<Option<Feature>, EngineError> {
        let (Some(lat), Some(lon)) = (v.lat, v.lon) else {
            return Ok(None);
        };

        let bearing = match v.bearing {
            Some(b) => b,
            None => self.interpolated_bearing(v, lat, lon).await?,
        };

        let trip_predictions = v
            .trip_id
            .as_deref()
            .and_then(|t| predictions.get(t))
            .cloned()
            .unwrap_or_default();

        let mut props = JsonObject::new();
        props.insert("label".into(), serde_json::json!(v.label));
        props.insert("trip_id".into(), serde_json::json!(v.trip_id));
        props.insert("route_id".into(), serde_json::json!(v.route_id));
        props.insert("stop_id".into(), serde_json::json!(v.stop_id));
        props.insert("current_status".into(), serde_json::json!(v.current_status));
        props.insert("occupancy_status".into(), serde_json::json!(v.occupancy_status));
        props.insert("speed".into(), serde_json::json!(v.speed));
        props.insert("bearing".into(), serde_json::json!(bearing));
        props.insert("updated_at".into(), serde_json::json!(v.updated_at));
        props.insert("predictions".into(), serde_json::Value::Array(trip_predictions));

        Ok(Some(point_feature(v.vehicle_id.clone(), lat, lon, props)))
    }

    async fn interpolated_bearing(
        &self,
        v: &VehicleRecord,
        lat: f64,
        lon: f64,
    ) -> Result<f64, EngineError> {
        let Some(trip_id) = v.trip_id.as_deref() else {
            return Ok(0.0);
        };
        let shape: Option<(Option<String>,)> =
            sqlx::query_as("SELECT shape_id FROM trips WHERE trip_id = ?")
                .bind(trip_id)
                .fetch_optional(self.store.read_pool())
                .await?;
        let Some((Some(shape_id),)) = shape else {
            return Ok(0.0);
        };
        let path = self.shapes.path(&self.store, &shape_id).await?;
        Ok(bearing::interpolate_bearing(&path, lat, lon))
    }

    /// Write stops/shapes/parking files for every mode class into
    /// `export_dir`, named `{class}_{layer}.geojson`.
    pub async fn export_all(&self, export_dir: &str) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(export_dir).await?;
        for &class in ModeClass::all() {
            let layers = [
                ("stops", self.stop_features(class).await?),
                ("shapes", self.shape_features(class).await?),
                ("parking", self.parking_features(class).await?),
            ];
            for (layer, features) in layers {
                let path = Path::new(export_dir).join(format!("{}_{layer}.geojson", class.name()));
                tokio::fs::write(&path, serde_json::to_string(&features)?).await?;
            }
        }
        info!(dir = export_dir, "Exported mode-class GeoJSON layers");
        Ok(())
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
