//! Shared timestamp and identifier helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use ulid::Ulid;

/// Current UTC time as RFC 3339 with millisecond precision (e.g. `2026-10-15T09:12:03.114Z`).
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parses an RFC 3339 timestamp, returning `None` for anything else.
pub fn parse_iso(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Milliseconds elapsed since `ts`, clamped at zero for clocks that run ahead.
pub fn age_millis(ts: &str) -> Option<u64> {
    let then = parse_iso(ts)?;
    let delta = Utc::now().signed_duration_since(then).num_milliseconds();
    Some(delta.max(0) as u64)
}

pub fn new_id() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_iso_round_trips_through_parse() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert!(parse_iso(&ts).is_some());
    }

    #[test]
    fn test_age_of_old_timestamp() {
        let age = age_millis("2000-01-01T00:00:00.000Z").unwrap();
        assert!(age > 1_000_000);
        assert!(age_millis("yesterday").is_none());
    }

    #[test]
    fn test_new_id_is_valid_ulid() {
        let id = new_id();
        assert!(Ulid::from_string(&id).is_ok());
        assert_ne!(id, new_id());
    }
}
