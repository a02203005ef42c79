use chrono::{DateTime, Datelike, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_date(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

/// Calendar (year, month) of a millisecond timestamp, in UTC.
pub fn year_month_of_ms(ms: i64) -> Option<(i32, u32)> {
    to_date(ms).map(|dt| (dt.year(), dt.month()))
}

/// Calendar (year, month) of an RFC 3339 timestamp, in UTC.
pub fn year_month_of_rfc3339(raw: &str) -> Option<(i32, u32)> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .map(|dt| (dt.year(), dt.month()))
}
