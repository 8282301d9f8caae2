use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Convert an absolute instant into wall-clock time of `tz`.
pub fn localized_datetime(time: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    time.with_timezone(&tz)
}

/// Resolve a local date and time to an instant in `tz`.
///
/// Ambiguous times (clocks turned back) resolve to the earlier instant. Times
/// inside a gap (clocks turned forward) move forward by the length of the gap,
/// so 02:30 in a one-hour gap fires at 03:30.
pub fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    let naive = date.and_time(time);
    if let Some(resolved) = tz.from_local_datetime(&naive).earliest() {
        return Some(resolved);
    }

    // Read the wall time with the offset in force before the gap.
    let before = tz
        .from_local_datetime(&(naive - Duration::days(1)))
        .earliest()?
        .offset()
        .fix();
    let instant = naive - Duration::seconds(i64::from(before.local_minus_utc()));
    Some(tz.from_utc_datetime(&instant))
}

/// Time left until the next whole minute after `now`.
pub fn until_next_minute(now: DateTime<Utc>) -> std::time::Duration {
    let into_minute = Duration::seconds(i64::from(now.second()))
        + Duration::nanoseconds(i64::from(now.nanosecond() % 1_000_000_000));
    (Duration::minutes(1) - into_minute)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(60))
}

pub fn parse_timezone(name: &str) -> Result<Tz, String> {
    name.trim()
        .parse::<Tz>()
        .map_err(|err| format!("invalid timezone `{name}`: {err}"))
}
