use chrono::{DateTime, Utc};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    // Clocks set before 1970 clamp to zero instead of wrapping.
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Format a timestamp (ms since epoch) as ISO 8601 UTC string
pub fn format_utc(timestamp_ms: u64) -> String {
    let millis = i64::try_from(timestamp_ms).unwrap_or(i64::MAX);
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(datetime) => datetime.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => "invalid-timestamp".to_string(),
    }
}
