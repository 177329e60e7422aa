//! Time and date helpers shared by storage and metrics.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{KanbanError, Result};

/// Format a timestamp for storage.
///
/// Fixed-width millisecond RFC3339 in UTC, so stored values sort
/// lexicographically in time order.
#[must_use]
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp (RFC3339, or `YYYY-MM-DD HH:MM:SS` as written by
/// SQLite's `CURRENT_TIMESTAMP`).
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Format a calendar day for storage.
#[must_use]
pub fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Parse a `YYYY-MM-DD` day, as accepted on the command line.
///
/// # Errors
///
/// Returns a validation error naming `field_name` if the date is malformed.
pub fn parse_day(s: &str, field_name: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| KanbanError::validation(field_name, "expected a date like 2025-01-15"))
}

/// UTC midnight of the day containing `now`.
#[must_use]
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(chrono::NaiveTime::MIN))
}

/// Start of a trailing window of `days` days ending at `now`.
#[must_use]
pub fn window_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}
