//! Timestamp utilities
//!
//! Entitlement timestamps are persisted as RFC 3339 text so that SQLite
//! comparisons and human inspection agree.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as Unix epoch milliseconds (API authentication clock)
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format a timestamp for storage (millisecond precision, `Z` suffix)
pub fn to_storage(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drop precision below what storage keeps, so values survive a round trip
pub fn storage_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

/// Parse a stored timestamp
pub fn from_storage(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Invalid stored timestamp '{}': {}", value, e)))
}

/// Parse an optional stored timestamp (NULL column → None)
pub fn from_storage_opt(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(from_storage).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01 00:00:00 UTC
    }

    #[test]
    fn test_storage_format_is_sortable_text() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 11, 2, 3, 4, 5).unwrap();
        assert_eq!(to_storage(early), "2026-01-02T03:04:05.000Z");
        assert!(to_storage(early) < to_storage(late));
    }

    #[test]
    fn test_storage_roundtrip_keeps_millis() {
        let ts = Utc.timestamp_millis_opt(1_780_000_000_123).unwrap();
        assert_eq!(from_storage(&to_storage(ts)).unwrap(), ts);
    }

    #[test]
    fn test_storage_precision_survives_roundtrip() {
        let ts = now();
        let truncated = storage_precision(ts);
        assert!(truncated <= ts);
        assert_eq!(from_storage(&to_storage(truncated)).unwrap(), truncated);
    }

    #[test]
    fn test_from_storage_rejects_garbage() {
        assert!(matches!(from_storage("yesterday"), Err(Error::InvalidInput(_))));
        assert_eq!(from_storage_opt(None).unwrap(), None);
    }
}
