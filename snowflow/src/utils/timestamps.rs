//! Timestamp formatting for run tags and warehouse values.

use chrono::{DateTime, Utc};

/// A UTC timestamp.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats as `YYYYMMDD_HHMMSS`, the sortable form embedded in run tags.
///
/// ```
/// use chrono::TimeZone;
/// use snowflow::utils::compact_timestamp;
///
/// let ts = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
/// assert_eq!(compact_timestamp(&ts), "20240309_070501");
/// ```
#[must_use]
pub fn compact_timestamp(ts: &Timestamp) -> String {
    ts.format("%Y%m%d_%H%M%S").to_string()
}

/// Formats as `YYYY-MM-DD HH:MM:SS.ffffff`, accepted by `TO_TIMESTAMP_NTZ`.
#[must_use]
pub fn ntz_timestamp(ts: &Timestamp) -> String {
    ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ntz_timestamp_has_microseconds() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(ntz_timestamp(&ts), "2024-01-02 03:04:05.000000");
    }

    #[test]
    fn test_compact_timestamps_sort_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(compact_timestamp(&earlier) < compact_timestamp(&later));
    }
}
