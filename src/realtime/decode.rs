//! Fetching and flattening of the live protobuf feeds.

use std::collections::HashMap;

use prost::Message;
use tracing::debug;

use crate::error::EngineError;

use super::{AlertRow, PredictionRow, VehicleRow};

/// Maximum allowed protobuf response size (50 MB)
const MAX_PROTOBUF_SIZE: usize = 50 * 1024 * 1024;

/// Fetch and decode a live protobuf feed. The API key, when configured, is
/// passed as a query parameter.
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
) -> Result<gtfs_realtime::FeedMessage, EngineError> {
    let mut request = client
        .get(url)
        .timeout(std::time::Duration::from_secs(30));
    if let Some(key) = api_key {
        request = request.query(&[("api_key", key)]);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(EngineError::NetworkMessage(format!(
            "live feed HTTP {}",
            response.status()
        )));
    }

    let bytes = response.bytes().await?;
    if bytes.len() > MAX_PROTOBUF_SIZE {
        return Err(EngineError::NetworkMessage(format!(
            "live feed response too large: {} bytes (max {} bytes)",
            bytes.len(),
            MAX_PROTOBUF_SIZE
        )));
    }

    gtfs_realtime::FeedMessage::decode(bytes.as_ref()).map_err(EngineError::from)
}

fn translated_text(ts: Option<&gtfs_realtime::TranslatedString>) -> Option<String> {
    ts.and_then(|t| t.translation.first()).map(|tr| tr.text.clone())
}

/// Flatten vehicle entities into rows.
///
/// A vehicle without its own timestamp inherits the feed header's. Positions
/// older than `stale_secs` are dropped. Duplicate vehicle ids keep the last
/// occurrence in feed order.
pub fn flatten_vehicles(
    feed: &gtfs_realtime::FeedMessage,
    now: i64,
    stale_secs: i64,
) -> Vec<VehicleRow> {
    let header_ts = feed.header.timestamp;
    let mut by_id: HashMap<String, VehicleRow> = HashMap::new();
    let mut stale = 0usize;

    for entity in &feed.entity {
        if entity.is_deleted == Some(true) {
            continue;
        }
        let Some(vp) = &entity.vehicle else {
            continue;
        };

        let vehicle_id = vp
            .vehicle
            .as_ref()
            .and_then(|v| v.id.clone())
            .unwrap_or_else(|| entity.id.clone());

        let updated_at = vp.timestamp.or(header_ts).unwrap_or(now.max(0) as u64) as i64;
        if now - updated_at > stale_secs {
            stale += 1;
            continue;
        }

        let row = VehicleRow {
            vehicle_id: vehicle_id.clone(),
            label: vp.vehicle.as_ref().and_then(|v| v.label.clone()),
            trip_id: vp.trip.as_ref().and_then(|t| t.trip_id.clone()),
            route_id: vp.trip.as_ref().and_then(|t| t.route_id.clone()),
            stop_id: vp.stop_id.clone(),
            stop_sequence: vp.current_stop_sequence.map(|s| s as i64),
            current_status: vp.current_status,
            lat: vp.position.as_ref().map(|p| p.latitude as f64),
            lon: vp.position.as_ref().map(|p| p.longitude as f64),
            bearing: vp.position.as_ref().and_then(|p| p.bearing).map(|b| b as f64),
            speed: vp.position.as_ref().and_then(|p| p.speed).map(|s| s as f64),
            occupancy_status: vp.occupancy_status,
            updated_at,
        };
        // Last write wins on duplicate ids.
        by_id.insert(vehicle_id, row);
    }

    if stale > 0 {
        debug!(stale, "Dropped stale vehicle positions");
    }
    by_id.into_values().collect()
}

/// Flatten trip updates into one prediction row per stop time update, with
/// synthetic sequential ids.
pub fn flatten_predictions(feed: &gtfs_realtime::FeedMessage) -> Vec<PredictionRow> {
    let mut rows = Vec::new();
    let mut next_id: i64 = 1;

    for entity in &feed.entity {
        if entity.is_deleted == Some(true) {
            continue;
        }
        let Some(tu) = &entity.trip_update else {
            continue;
        };

        let trip_id = tu.trip.trip_id.clone();
        let route_id = tu.trip.route_id.clone();
        let vehicle_id = tu.vehicle.as_ref().and_then(|v| v.id.clone());

        for stu in &tu.stop_time_update {
            rows.push(PredictionRow {
                prediction_id: next_id,
                trip_id: trip_id.clone(),
                route_id: route_id.clone(),
                stop_id: stu.stop_id.clone(),
                stop_sequence: stu.stop_sequence.map(|s| s as i64),
                arrival_time: stu.arrival.as_ref().and_then(|e| e.time),
                departure_time: stu.departure.as_ref().and_then(|e| e.time),
                schedule_relationship: stu.schedule_relationship,
                vehicle_id: vehicle_id.clone(),
            });
            next_id += 1;
        }
    }
    rows
}

/// Flatten alerts into one row per (informed entity, active period) pair. An
/// alert with no informed entities or no active periods still yields rows,
/// with the missing side null.
pub fn flatten_alerts(feed: &gtfs_realtime::FeedMessage) -> Vec<AlertRow> {
    let mut rows = Vec::new();

    for entity in &feed.entity {
        if entity.is_deleted == Some(true) {
            continue;
        }
        let Some(alert) = &entity.alert else {
            continue;
        };

        let header = translated_text(alert.header_text.as_ref());
        let description = translated_text(alert.description_text.as_ref());

        let selectors: Vec<Option<&gtfs_realtime::EntitySelector>> =
            if alert.informed_entity.is_empty() {
                vec![None]
            } else {
                alert.informed_entity.iter().map(Some).collect()
            };
        let periods: Vec<Option<&gtfs_realtime::TimeRange>> = if alert.active_period.is_empty() {
            vec![None]
        } else {
            alert.active_period.iter().map(Some).collect()
        };

        for selector in &selectors {
            for period in &periods {
                rows.push(AlertRow {
                    alert_id: entity.id.clone(),
                    cause: alert.cause,
                    effect: alert.effect,
                    severity: alert.severity_level,
                    header: header.clone(),
                    description: description.clone(),
                    route_id: selector.and_then(|s| s.route_id.clone()),
                    route_type: selector.and_then(|s| s.route_type),
                    trip_id: selector
                        .and_then(|s| s.trip.as_ref())
                        .and_then(|t| t.trip_id.clone()),
                    stop_id: selector.and_then(|s| s.stop_id.clone()),
                    active_period_start: period.and_then(|p| p.start).map(|v| v as i64),
                    active_period_end: period.and_then(|p| p.end).map(|v| v as i64),
                });
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_feed(entities: Vec<gtfs_realtime::FeedEntity>) -> gtfs_realtime::FeedMessage {
        gtfs_realtime::FeedMessage {
            header: gtfs_realtime::FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                incrementality: Some(0),
                timestamp: Some(1_000_000),
                feed_version: None,
            },
            entity: entities,
        }
    }

    fn make_vehicle_entity(
        entity_id: &str,
        vehicle_id: Option<&str>,
        timestamp: Option<u64>,
        lat: f32,
        lon: f32,
        bearing: Option<f32>,
    ) -> gtfs_realtime::FeedEntity {
        gtfs_realtime::FeedEntity {
            id: entity_id.to_string(),
            vehicle: Some(gtfs_realtime::VehiclePosition {
                vehicle: vehicle_id.map(|id| gtfs_realtime::VehicleDescriptor {
                    id: Some(id.to_string()),
                    label: Some(format!("car {id}")),
                    ..Default::default()
                }),
                position: Some(gtfs_realtime::Position {
                    latitude: lat,
                    longitude: lon,
                    bearing,
                    ..Default::default()
                }),
                timestamp,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn vehicles_inherit_header_timestamp() {
        let feed = make_feed(vec![make_vehicle_entity(
            "e1",
            Some("v1"),
            None,
            42.36,
            -71.06,
            Some(90.0),
        )]);
        let rows = flatten_vehicles(&feed, 1_000_010, 300);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].updated_at, 1_000_000);
        assert_eq!(rows[0].bearing, Some(90.0));
        assert_eq!(rows[0].label.as_deref(), Some("car v1"));
    }

    #[test]
    fn stale_vehicles_are_dropped() {
        let feed = make_feed(vec![
            make_vehicle_entity("e1", Some("fresh"), Some(1_000_000), 42.0, -71.0, None),
            make_vehicle_entity("e2", Some("stale"), Some(999_000), 42.0, -71.0, None),
        ]);
        let rows = flatten_vehicles(&feed, 1_000_100, 300);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vehicle_id, "fresh");
    }

    #[test]
    fn duplicate_vehicle_ids_keep_last_occurrence() {
        let feed = make_feed(vec![
            make_vehicle_entity("e1", Some("v1"), Some(1_000_000), 42.0, -71.0, None),
            make_vehicle_entity("e2", Some("v1"), Some(1_000_050), 43.0, -72.0, None),
        ]);
        let rows = flatten_vehicles(&feed, 1_000_100, 300);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].lat, Some(43.0));
        assert_eq!(rows[0].updated_at, 1_000_050);
    }

    #[test]
    fn vehicle_without_descriptor_falls_back_to_entity_id() {
        let feed = make_feed(vec![make_vehicle_entity(
            "entity-7",
            None,
            Some(1_000_000),
            42.0,
            -71.0,
            None,
        )]);
        let rows = flatten_vehicles(&feed, 1_000_000, 300);
        assert_eq!(rows[0].vehicle_id, "entity-7");
    }

    #[test]
    fn predictions_get_sequential_ids_across_trips() {
        let stu = |stop: &str, seq: u32, arrival: Option<i64>| {
            gtfs_realtime::trip_update::StopTimeUpdate {
                stop_sequence: Some(seq),
                stop_id: Some(stop.to_string()),
                arrival: arrival.map(|t| gtfs_realtime::trip_update::StopTimeEvent {
                    time: Some(t),
                    ..Default::default()
                }),
                ..Default::default()
            }
        };
        let entity = |id: &str, trip: &str, stus: Vec<gtfs_realtime::trip_update::StopTimeUpdate>| {
            gtfs_realtime::FeedEntity {
                id: id.to_string(),
                trip_update: Some(gtfs_realtime::TripUpdate {
                    trip: gtfs_realtime::TripDescriptor {
                        trip_id: Some(trip.to_string()),
                        route_id: Some("Red".to_string()),
                        ..Default::default()
                    },
                    stop_time_update: stus,
                    ..Default::default()
                }),
                ..Default::default()
            }
        };

        let feed = make_feed(vec![
            entity("e1", "t1", vec![stu("s1", 1, Some(100)), stu("s2", 2, Some(200))]),
            entity("e2", "t2", vec![stu("s1", 1, None)]),
        ]);
        let rows = flatten_predictions(&feed);
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows.iter().map(|r| r.prediction_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(rows[0].arrival_time, Some(100));
        assert!(rows[2].arrival_time.is_none());
        assert_eq!(rows[2].trip_id.as_deref(), Some("t2"));
    }

    #[test]
    fn alerts_cross_informed_entities_with_active_periods() {
        let alert = gtfs_realtime::Alert {
            active_period: vec![
                gtfs_realtime::TimeRange {
                    start: Some(100),
                    end: Some(200),
                },
                gtfs_realtime::TimeRange {
                    start: Some(300),
                    end: None,
                },
            ],
            informed_entity: vec![
                gtfs_realtime::EntitySelector {
                    route_id: Some("Red".to_string()),
                    ..Default::default()
                },
                gtfs_realtime::EntitySelector {
                    stop_id: Some("70061".to_string()),
                    ..Default::default()
                },
            ],
            cause: Some(9),
            effect: Some(4),
            severity_level: Some(2),
            header_text: Some(gtfs_realtime::TranslatedString {
                translation: vec![gtfs_realtime::translated_string::Translation {
                    text: "Delays".to_string(),
                    language: Some("en".to_string()),
                }],
            }),
            ..Default::default()
        };
        let feed = make_feed(vec![gtfs_realtime::FeedEntity {
            id: "a1".to_string(),
            alert: Some(alert),
            ..Default::default()
        }]);

        let rows = flatten_alerts(&feed);
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.alert_id == "a1"));
        assert!(rows.iter().all(|r| r.header.as_deref() == Some("Delays")));
        assert_eq!(rows.iter().filter(|r| r.route_id.is_some()).count(), 2);
        assert_eq!(rows.iter().filter(|r| r.stop_id.is_some()).count(), 2);
        assert_eq!(
            rows.iter().filter(|r| r.active_period_end.is_none()).count(),
            2
        );
    }

    #[test]
    fn alert_with_no_entities_or_periods_still_yields_a_row() {
        let feed = make_feed(vec![gtfs_realtime::FeedEntity {
            id: "a1".to_string(),
            alert: Some(gtfs_realtime::Alert {
                cause: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        let rows = flatten_alerts(&feed);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].route_id.is_none());
        assert!(rows[0].active_period_start.is_none());
        assert_eq!(rows[0].cause, Some(1));
    }

    #[test]
    fn deleted_entities_are_skipped() {
        let mut entity = make_vehicle_entity("e1", Some("v1"), Some(1_000_000), 42.0, -71.0, None);
        entity.is_deleted = Some(true);
        let feed = make_feed(vec![entity]);
        assert!(flatten_vehicles(&feed, 1_000_000, 300).is_empty());
    }
}
