use std::time::{SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// RFC 3339 rendering of an epoch-seconds timestamp, falling back to the raw
/// number when it is out of range.
pub fn format_epoch_secs(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_else(|| secs.to_string())
}

pub fn parse_rfc3339_secs(value: &str) -> Option<u64> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339).ok()?;
    u64::try_from(parsed.unix_timestamp()).ok()
}

/// Compact human form of a duration in seconds, e.g. `2h 5m`.
pub fn format_elapsed(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
