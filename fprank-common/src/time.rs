//! Timestamp utilities and composite date buckets

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Fixed-width UTC text form used for every stored timestamp.
///
/// Microsecond precision with a `Z` suffix keeps lexicographic order equal
/// to chronological order inside SQLite.
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn from_db(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

/// Granularity at which composite scores overwrite each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeBucket {
    #[default]
    Day,
    Week,
    Month,
}

impl CompositeBucket {
    /// First UTC day of the bucket containing `ts`
    pub fn start(self, ts: DateTime<Utc>) -> NaiveDate {
        let day = ts.date_naive();
        match self {
            CompositeBucket::Day => day,
            CompositeBucket::Week => day - Duration::days(i64::from(day.weekday().num_days_from_monday())),
            CompositeBucket::Month => day.with_day(1).unwrap_or(day),
        }
    }

    /// Storage key for the bucket containing `ts` (its first day, `YYYY-MM-DD`)
    pub fn key(self, ts: DateTime<Utc>) -> String {
        self.start(ts).format("%Y-%m-%d").to_string()
    }

    /// Last representable instant of the bucket containing `ts`
    pub fn end(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.start(ts);
        let next = match self {
            CompositeBucket::Day => start + Duration::days(1),
            CompositeBucket::Week => start + Duration::days(7),
            CompositeBucket::Month => {
                let (year, month) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(start + Duration::days(31))
            }
        };
        let next_midnight = Utc.from_utc_datetime(&next.and_time(chrono::NaiveTime::MIN));
        next_midnight - Duration::microseconds(1)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompositeBucket::Day => "day",
            CompositeBucket::Week => "week",
            CompositeBucket::Month => "month",
        }
    }
}

impl FromStr for CompositeBucket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(CompositeBucket::Day),
            "week" => Ok(CompositeBucket::Week),
            "month" => Ok(CompositeBucket::Month),
            other => Err(Error::Config(format!("Invalid composite bucket: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_millis_to_duration_one_second() {
        let duration = millis_to_duration(1000);
        assert_eq!(duration, std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_db_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
        let later = early + Duration::milliseconds(250);
        assert!(to_db(early) < to_db(later));
        assert_eq!(to_db(early), "2025-03-14T09:00:00.000000Z");
        assert_eq!(from_db(&to_db(later)).unwrap(), later);
        assert!(from_db("yesterday").is_err());
    }

    #[test]
    fn test_day_bucket_key_and_end() {
        let ts = at(2025, 3, 14, 18);
        assert_eq!(CompositeBucket::Day.key(ts), "2025-03-14");
        let end = CompositeBucket::Day.end(ts);
        assert_eq!(end.date_naive(), NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
        assert!(end > ts);
        assert_eq!(end + Duration::microseconds(1), at(2025, 3, 15, 0));
    }

    #[test]
    fn test_week_bucket_starts_monday() {
        // 2025-03-14 is a Friday
        assert_eq!(CompositeBucket::Week.key(at(2025, 3, 14, 9)), "2025-03-10");
        assert_eq!(CompositeBucket::Week.end(at(2025, 3, 14, 9)) + Duration::microseconds(1), at(2025, 3, 17, 0));
    }

    #[test]
    fn test_month_bucket_rolls_over_year() {
        let ts = at(2024, 12, 20, 12);
        assert_eq!(CompositeBucket::Month.key(ts), "2024-12-01");
        assert_eq!(CompositeBucket::Month.end(ts) + Duration::microseconds(1), at(2025, 1, 1, 0));
    }

    #[test]
    fn test_bucket_parse() {
        assert_eq!("Week".parse::<CompositeBucket>().unwrap(), CompositeBucket::Week);
        assert!("fortnight".parse::<CompositeBucket>().is_err());
        assert_eq!(CompositeBucket::default(), CompositeBucket::Day);
    }
}
