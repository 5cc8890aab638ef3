//! Generic entity querying with a closed predicate set.
//!
//! A predicate is a (field, operator, value) triple. Fields are validated
//! against the entity's known columns before any SQL is built; an unknown
//! field is an error, an unknown entity kind is an empty result.

use serde::Deserialize;
use sqlx::{Column, Row};
use tracing::debug;

use crate::db::Store;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Gt,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(FilterOp::Eq),
            "ne" => Some(FilterOp::Ne),
            "lt" => Some(FilterOp::Lt),
            "gt" => Some(FilterOp::Gt),
            "is_null" => Some(FilterOp::IsNull),
            "is_not_null" => Some(FilterOp::IsNotNull),
            _ => None,
        }
    }

    fn needs_value(&self) -> bool {
        !matches!(self, FilterOp::IsNull | FilterOp::IsNotNull)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// Known columns per queryable entity kind.
fn entity_columns(kind: &str) -> Option<(&'static str, &'static [&'static str])> {
    match kind {
        "stops" => Some((
            "stops",
            &["stop_id", "stop_name", "platform_name", "lat", "lon", "parent_station"],
        )),
        "routes" => Some((
            "routes",
            &[
                "route_id",
                "agency_id",
                "route_short_name",
                "route_long_name",
                "route_type",
                "route_color",
                "route_text_color",
            ],
        )),
        "trips" => Some((
            "trips",
            &["trip_id", "route_id", "service_id", "trip_headsign", "direction_id", "shape_id"],
        )),
        "stop_times" => Some((
            "stop_times",
            &["trip_id", "arrival_time", "departure_time", "stop_id", "stop_sequence"],
        )),
        "facilities" => Some((
            "facilities",
            &[
                "facility_id",
                "facility_type",
                "stop_id",
                "facility_short_name",
                "facility_long_name",
                "lat",
                "lon",
            ],
        )),
        "vehicles" => Some((
            "vehicles",
            &[
                "vehicle_id",
                "label",
                "trip_id",
                "route_id",
                "stop_id",
                "stop_sequence",
                "current_status",
                "lat",
                "lon",
                "bearing",
                "speed",
                "occupancy_status",
                "updated_at",
            ],
        )),
        "predictions" => Some((
            "predictions",
            &[
                "prediction_id",
                "trip_id",
                "route_id",
                "stop_id",
                "stop_sequence",
                "arrival_time",
                "departure_time",
                "schedule_relationship",
                "vehicle_id",
            ],
        )),
        "transfers" => Some((
            "transfers",
            &[
                "from_stop_id",
                "to_stop_id",
                "transfer_type",
                "min_transfer_time",
                "from_trip_id",
                "to_trip_id",
            ],
        )),
        "alerts" => Some((
            "alerts",
            &[
                "alert_id",
                "cause",
                "effect",
                "severity",
                "header",
                "description",
                "route_id",
                "route_type",
                "trip_id",
                "stop_id",
                "active_period_start",
                "active_period_end",
            ],
        )),
        _ => None,
    }
}

fn row_to_json(row: &sqlx::sqlite::SqliteRow) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (idx, col) in row.columns().iter().enumerate() {
        let value = if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            serde_json::json!(v)
        } else if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            serde_json::json!(v)
        } else if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            serde_json::json!(v)
        } else {
            serde_json::Value::Null
        };
        map.insert(col.name().to_string(), value);
    }
    serde_json::Value::Object(map)
}

/// Run a filtered query against one entity kind, returning rows as JSON
/// objects keyed by column name.
pub async fn query_entity(
    store: &Store,
    kind: &str,
    filters: &[Predicate],
) -> Result<Vec<serde_json::Value>, EngineError> {
    let Some((table, columns)) = entity_columns(kind) else {
        debug!(kind, "Query against unknown entity kind");
        return Ok(Vec::new());
    };

    let mut clauses = Vec::new();
    for p in filters {
        if !columns.contains(&p.field.as_str()) {
            return Err(EngineError::UnknownField(format!("{}.{}", kind, p.field)));
        }
        let clause = match p.op {
            FilterOp::Eq => format!("{} = ?", p.field),
            FilterOp::Ne => format!("{} != ?", p.field),
            FilterOp::Lt => format!("{} < ?", p.field),
            FilterOp::Gt => format!("{} > ?", p.field),
            FilterOp::IsNull => format!("{} IS NULL", p.field),
            FilterOp::IsNotNull => format!("{} IS NOT NULL", p.field),
        };
        clauses.push(clause);
    }

    let sql = if clauses.is_empty() {
        format!("SELECT * FROM {table}")
    } else {
        format!("SELECT * FROM {table} WHERE {}", clauses.join(" AND "))
    };

    let mut query = sqlx::query(&sql);
    for p in filters.iter().filter(|p| p.op.needs_value()) {
        query = match &p.value {
            Some(serde_json::Value::Number(n)) if n.is_i64() => query.bind(n.as_i64()),
            Some(serde_json::Value::Number(n)) => query.bind(n.as_f64()),
            Some(serde_json::Value::Bool(b)) => query.bind(*b),
            Some(serde_json::Value::String(s)) => query.bind(s.clone()),
            Some(other) => query.bind(other.to_string()),
            None => query.bind(Option::<String>::None),
        };
    }

    let rows = query.fetch_all(store.read_pool()).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::schedule::tables::{RouteRow, StaticTables, StopRow, TransferRow};

    fn pred(field: &str, op: FilterOp, value: Option<serde_json::Value>) -> Predicate {
        Predicate {
            field: field.to_string(),
            op,
            value,
        }
    }

    async fn seeded_store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        schema::recreate_static_tables(store.write_pool()).await.unwrap();
        schema::ensure_live_tables(store.write_pool()).await.unwrap();

        let fixture = StaticTables {
            stops: vec![
                StopRow {
                    stop_id: "place-alfcl".into(),
                    name: Some("Alewife".into()),
                    platform_name: None,
                    lat: Some(42.396),
                    lon: Some(-71.140),
                    parent_station: None,
                },
                StopRow {
                    stop_id: "70061".into(),
                    name: Some("Alewife".into()),
                    platform_name: Some("Red Line".into()),
                    lat: Some(42.396),
                    lon: Some(-71.139),
                    parent_station: Some("place-alfcl".into()),
                },
            ],
            routes: vec![
                RouteRow {
                    route_id: "Red".into(),
                    agency_id: None,
                    short_name: None,
                    long_name: Some("Red Line".into()),
                    route_type: 1,
                    color: None,
                    text_color: None,
                },
                RouteRow {
                    route_id: "66".into(),
                    agency_id: None,
                    short_name: Some("66".into()),
                    long_name: None,
                    route_type: 3,
                    color: None,
                    text_color: None,
                },
            ],
            transfers: vec![TransferRow {
                from_stop_id: Some("place-alfcl".into()),
                to_stop_id: Some("70061".into()),
                transfer_type: Some(2),
                min_transfer_time: Some(180),
                from_trip_id: None,
                to_trip_id: None,
            }],
            ..Default::default()
        };
        crate::schedule::tables::insert_all(store.write_pool(), &fixture)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn eq_and_is_null_filters_compose() {
        let store = seeded_store().await;
        let rows = query_entity(
            &store,
            "stops",
            &[
                pred("stop_name", FilterOp::Eq, Some(serde_json::json!("Alewife"))),
                pred("parent_station", FilterOp::IsNull, None),
            ],
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["stop_id"], "place-alfcl");
        assert!(rows[0]["parent_station"].is_null());
    }

    #[tokio::test]
    async fn numeric_comparison_filters() {
        let store = seeded_store().await;
        let rows = query_entity(
            &store,
            "routes",
            &[pred("route_type", FilterOp::Lt, Some(serde_json::json!(2)))],
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["route_id"], "Red");

        let rows = query_entity(
            &store,
            "routes",
            &[pred("route_type", FilterOp::Ne, Some(serde_json::json!(3)))],
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn transfers_are_queryable() {
        let store = seeded_store().await;
        let rows = query_entity(
            &store,
            "transfers",
            &[pred("from_stop_id", FilterOp::Eq, Some(serde_json::json!("place-alfcl")))],
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["to_stop_id"], "70061");
        assert_eq!(rows[0]["min_transfer_time"], 180);
        assert!(rows[0]["from_trip_id"].is_null());
    }

    #[tokio::test]
    async fn unknown_kind_returns_empty() {
        let store = seeded_store().await;
        let rows = query_entity(&store, "gondolas", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn unknown_field_is_an_error() {
        let store = seeded_store().await;
        let result = query_entity(
            &store,
            "stops",
            &[pred("favorite_color", FilterOp::Eq, Some(serde_json::json!("red")))],
        )
        .await;
        assert!(matches!(result, Err(EngineError::UnknownField(_))));
    }

    #[test]
    fn filter_op_parse_round_trip() {
        assert_eq!(FilterOp::parse("eq"), Some(FilterOp::Eq));
        assert_eq!(FilterOp::parse("is_not_null"), Some(FilterOp::IsNotNull));
        assert_eq!(FilterOp::parse("like"), None);
    }
}
