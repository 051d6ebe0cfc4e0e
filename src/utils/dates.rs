//! Date and time utilities

use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};

/// Milliseconds elapsed since `start`
pub fn msec_since(start: Instant) -> u128 {
    start.elapsed().as_millis()
}

/// Parse a user-supplied date
///
/// Accepts RFC 3339 timestamps ("2021-03-04T05:06:07Z"), plain dates
/// ("2021-03-04", taken as midnight UTC) and Unix seconds.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    s.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
