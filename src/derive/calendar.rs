//! Calendar activation.
//!
//! A service operates on a date iff the date falls in the calendar's range
//! and the weekday bit is set and no "removed" exception covers the date, or
//! an "added" exception covers the date regardless of the range test.

use chrono::{Datelike, NaiveDate, Weekday};

use crate::db::Store;
use crate::error::EngineError;

pub const EXCEPTION_ADDED: i32 = 1;
pub const EXCEPTION_REMOVED: i32 = 2;

/// A calendar's weekday mask and validity range.
#[derive(Debug, Clone)]
pub struct CalendarSpan {
    pub days: [bool; 7], // mon..sun
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Parse a schedule date string "YYYYMMDD".
pub fn parse_service_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[4..6].parse().ok()?;
    let day: u32 = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn weekday_index(date: NaiveDate) -> usize {
    match date.weekday() {
        Weekday::Mon => 0,
        Weekday::Tue => 1,
        Weekday::Wed => 2,
        Weekday::Thu => 3,
        Weekday::Fri => 4,
        Weekday::Sat => 5,
        Weekday::Sun => 6,
    }
}

/// The activation truth table. `exceptions` holds (date, exception_type)
/// pairs for this service only.
pub fn operates_on(
    calendar: Option<&CalendarSpan>,
    exceptions: &[(NaiveDate, i32)],
    date: NaiveDate,
) -> bool {
    for (exc_date, exc_type) in exceptions {
        if *exc_date == date {
            return *exc_type == EXCEPTION_ADDED;
        }
    }
    if let Some(cal) = calendar {
        if date < cal.start || date > cal.end {
            return false;
        }
        return cal.days[weekday_index(date)];
    }
    false
}

/// Store-backed activation check for one service id.
pub async fn service_active(
    store: &Store,
    service_id: &str,
    date: NaiveDate,
) -> Result<bool, EngineError> {
    type CalendarTuple = (bool, bool, bool, bool, bool, bool, bool, String, String);
    let row: Option<CalendarTuple> = sqlx::query_as(
        "SELECT monday, tuesday, wednesday, thursday, friday, saturday, sunday,
                start_date, end_date
         FROM calendars WHERE service_id = ?",
    )
    .bind(service_id)
    .fetch_optional(store.read_pool())
    .await?;

    let calendar = row.and_then(|(mo, tu, we, th, fr, sa, su, start, end)| {
        Some(CalendarSpan {
            days: [mo, tu, we, th, fr, sa, su],
            start: parse_service_date(&start)?,
            end: parse_service_date(&end)?,
        })
    });

    let exception_rows: Vec<(String, i32)> = sqlx::query_as(
        "SELECT date, exception_type FROM calendar_exceptions WHERE service_id = ?",
    )
    .bind(service_id)
    .fetch_all(store.read_pool())
    .await?;
    let exceptions: Vec<(NaiveDate, i32)> = exception_rows
        .into_iter()
        .filter_map(|(d, t)| Some((parse_service_date(&d)?, t)))
        .collect();

    Ok(operates_on(calendar.as_ref(), &exceptions, date))
}

/// A trip also counts as active when it carries at least one live prediction,
/// covering same-day added or rerouted service the static calendar missed.
pub async fn trip_active(
    store: &Store,
    trip_id: &str,
    date: NaiveDate,
) -> Result<bool, EngineError> {
    let service: Option<(String,)> =
        sqlx::query_as("SELECT service_id FROM trips WHERE trip_id = ?")
            .bind(trip_id)
            .fetch_optional(store.read_pool())
            .await?;
    if let Some((service_id,)) = service {
        if service_active(store, &service_id, date).await? {
            return Ok(true);
        }
    }

    let (predictions,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM predictions WHERE trip_id = ?")
            .bind(trip_id)
            .fetch_one(store.read_pool())
            .await?;
    Ok(predictions > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weekday_span() -> CalendarSpan {
        CalendarSpan {
            days: [true, true, true, true, true, false, false],
            start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
        }
    }

    #[test]
    fn base_range_and_weekday_mask() {
        let cal = weekday_span();
        // Monday inside range.
        let monday = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        assert!(operates_on(Some(&cal), &[], monday));
        // Saturday inside range but weekday bit off.
        let saturday = NaiveDate::from_ymd_opt(2026, 2, 7).unwrap();
        assert!(!operates_on(Some(&cal), &[], saturday));
        // Monday outside range.
        let monday_2027 = NaiveDate::from_ymd_opt(2027, 1, 4).unwrap();
        assert!(!operates_on(Some(&cal), &[], monday_2027));
    }

    #[test]
    fn removed_exception_inside_range_wins() {
        let cal = weekday_span();
        let monday = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        assert!(!operates_on(
            Some(&cal),
            &[(monday, EXCEPTION_REMOVED)],
            monday
        ));
    }

    #[test]
    fn added_exception_outside_range_wins() {
        let cal = weekday_span();
        let monday_2027 = NaiveDate::from_ymd_opt(2027, 1, 4).unwrap();
        assert!(operates_on(
            Some(&cal),
            &[(monday_2027, EXCEPTION_ADDED)],
            monday_2027
        ));
    }

    #[test]
    fn exception_only_service_needs_added_dates() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 4).unwrap();
        assert!(operates_on(None, &[(date, EXCEPTION_ADDED)], date));
        assert!(!operates_on(None, &[], date));
    }

    #[test]
    fn parse_service_date_rejects_garbage() {
        assert_eq!(
            parse_service_date("20260201"),
            Some(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap())
        );
        assert_eq!(parse_service_date("bad"), None);
        assert_eq!(parse_service_date("20261301"), None);
        assert_eq!(parse_service_date(""), None);
    }

    #[tokio::test]
    async fn trip_with_prediction_is_active_despite_calendar() {
        use crate::db::schema;
        use crate::realtime::{replace, PredictionRow};
        use crate::schedule::tables::{CalendarRow, RouteRow, StaticTables, TripRow};

        let store = Store::open_in_memory().await.unwrap();
        schema::recreate_static_tables(store.write_pool()).await.unwrap();
        schema::ensure_live_tables(store.write_pool()).await.unwrap();

        let fixture = StaticTables {
            calendars: vec![CalendarRow {
                service_id: "weekday".into(),
                days: [true, true, true, true, true, false, false],
                start_date: "20260101".into(),
                end_date: "20261231".into(),
            }],
            routes: vec![RouteRow {
                route_id: "Red".into(),
                agency_id: None,
                short_name: None,
                long_name: None,
                route_type: 1,
                color: None,
                text_color: None,
            }],
            trips: vec![TripRow {
                trip_id: "t1".into(),
                route_id: "Red".into(),
                service_id: "weekday".into(),
                headsign: None,
                direction_id: None,
                shape_id: None,
            }],
            ..Default::default()
        };
        crate::schedule::tables::insert_all(store.write_pool(), &fixture)
            .await
            .unwrap();

        // Saturday: the weekday calendar says no.
        let saturday = NaiveDate::from_ymd_opt(2026, 2, 7).unwrap();
        assert!(!trip_active(&store, "t1", saturday).await.unwrap());

        replace::replace_predictions(
            store.write_pool(),
            &[PredictionRow {
                prediction_id: 1,
                trip_id: Some("t1".into()),
                route_id: Some("Red".into()),
                stop_id: Some("s1".into()),
                stop_sequence: Some(1),
                arrival_time: Some(1_000_000),
                departure_time: None,
                schedule_relationship: None,
                vehicle_id: None,
            }],
        )
        .await
        .unwrap();

        // A live prediction overrides the calendar verdict.
        assert!(trip_active(&store, "t1", saturday).await.unwrap());
    }
}
