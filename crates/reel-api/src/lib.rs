pub mod error;
pub mod middleware;
pub mod password;
pub mod state;
pub mod tokens;
pub mod users;
pub mod videos;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

/// Parse a SQLite `datetime('now')` timestamp into a UTC datetime.
/// SQLite stores these as "YYYY-MM-DD HH:MM:SS" without a timezone.
pub(crate) fn parse_db_timestamp(raw: &str, record_id: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on record '{}': {}", raw, record_id, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::parse_db_timestamp;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_sqlite_datetime_format() {
        let ts = parse_db_timestamp("2026-08-29 12:34:56", "r1");
        assert_eq!(ts.year(), 2026);
        assert_eq!(ts.hour(), 12);
    }

    #[test]
    fn corrupt_timestamp_falls_back_to_default() {
        let ts = parse_db_timestamp("not-a-date", "r1");
        assert_eq!(ts, chrono::DateTime::<chrono::Utc>::default());
    }
}
