//! Stop-time delay: predicted epoch time minus scheduled time, where the
//! schedule side is a seconds-past-midnight string anchored to a service date
//! in the agency's timezone.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Parse a schedule time string "HH:MM:SS" into seconds past midnight.
/// Hours may exceed 24 for trips running past the service day boundary.
pub fn parse_schedule_time(s: &str) -> Option<i32> {
    let mut parts = s.split(':');
    let hours: i32 = parts.next()?.parse().ok()?;
    let minutes: i32 = parts.next()?.parse().ok()?;
    let seconds: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0 || !(0..60).contains(&minutes) || !(0..60).contains(&seconds)
    {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Convert seconds past midnight plus a service date into a UTC instant,
/// handling hours >= 24 and the timezone's DST transitions.
pub fn schedule_time_to_utc(
    seconds_past_midnight: i32,
    service_date: NaiveDate,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    if seconds_past_midnight < 0 {
        return None;
    }
    let hours = seconds_past_midnight / 3600;
    let minutes = (seconds_past_midnight % 3600) / 60;
    let secs = seconds_past_midnight % 60;

    let (date, time) = if hours >= 24 {
        let next_day = service_date.succ_opt()?;
        let t = NaiveTime::from_hms_opt((hours - 24) as u32, minutes as u32, secs as u32)?;
        (next_day, t)
    } else {
        let t = NaiveTime::from_hms_opt(hours as u32, minutes as u32, secs as u32)?;
        (service_date, t)
    };

    tz.from_local_datetime(&NaiveDateTime::new(date, time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Delay in seconds of a predicted epoch time against a scheduled time
/// string. Positive means late. None when the schedule side is unparseable.
pub fn stop_delay_secs(
    scheduled: &str,
    service_date: NaiveDate,
    tz: Tz,
    predicted_epoch: i64,
) -> Option<i64> {
    let secs = parse_schedule_time(scheduled)?;
    let scheduled_utc = schedule_time_to_utc(secs, service_date, tz)?;
    Some(predicted_epoch - scheduled_utc.timestamp())
}

/// Delay for a live prediction, where no service date is carried on the
/// record. The anchor is the prediction's own local date; trips running past
/// midnight were scheduled against the previous service day, so both
/// candidates are tried and the one with the smaller absolute delay wins.
pub fn prediction_delay_secs(scheduled: &str, tz: Tz, predicted_epoch: i64) -> Option<i64> {
    let local_date = Utc
        .timestamp_opt(predicted_epoch, 0)
        .single()?
        .with_timezone(&tz)
        .date_naive();
    let same_day = stop_delay_secs(scheduled, local_date, tz, predicted_epoch);
    let prior_day = local_date
        .pred_opt()
        .and_then(|d| stop_delay_secs(scheduled, d, tz, predicted_epoch));
    match (same_day, prior_day) {
        (Some(a), Some(b)) => Some(if a.abs() <= b.abs() { a } else { b }),
        (a, b) => a.or(b),
    }
}
