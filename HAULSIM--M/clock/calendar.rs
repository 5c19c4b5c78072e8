use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};

/// Milliseconds in one calendar day.
pub const MS_PER_DAY: i64 = 86_400_000;

/// `00:00:00.000` UTC of the day containing `instant`.
#[must_use]
pub fn start_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    day_start(instant.date_naive())
}

/// `23:59:59.999` UTC of the day containing `instant`.
#[must_use]
pub fn end_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    day_start(instant.date_naive()) + Duration::milliseconds(MS_PER_DAY - 1)
}

/// Midnight UTC opening `date`.
#[must_use]
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map_or(DateTime::<Utc>::MIN_UTC, |naive| Utc.from_utc_datetime(&naive))
}

/// Midnight UTC of the day after `instant`.
#[must_use]
pub fn next_midnight(instant: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(instant) + Duration::days(1)
}

/// True when `instant` is exactly `00:00:00.000` UTC.
#[must_use]
pub fn is_midnight(instant: DateTime<Utc>) -> bool {
    instant == start_of_day(instant)
}

/// True when `instant` falls in the last minute of its day.
#[must_use]
pub fn is_last_minute(instant: DateTime<Utc>) -> bool {
    instant.hour() == 23 && instant.minute() == 59
}
