//! Wall-clock formatting (UTC).

use chrono::{DateTime, Utc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIME_OF_DAY_FORMAT: &str = "%H:%M:%S%.3f";

/// Current time as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Current time of day as `HH:MM:SS.mmm` (UTC).
pub fn now_time_of_day() -> String {
    format_time_of_day(Utc::now())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn format_time_of_day(at: DateTime<Utc>) -> String {
    at.format(TIME_OF_DAY_FORMAT).to_string()
}
