//! Run identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::utils::{compact_timestamp, now_utc, Timestamp};

/// Identifies one orchestrator run.
///
/// Generated identifiers look like `RUN_20240309_070501_1a2b3c4d`: a UTC
/// timestamp followed by eight random hex digits, so they sort by start time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generates a fresh identifier for the current time.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_at(&now_utc())
    }

    /// Generates a fresh identifier for a given time.
    #[must_use]
    pub fn generate_at(ts: &Timestamp) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("RUN_{}_{}", compact_timestamp(ts), &suffix[..8]))
    }

    /// Wraps an existing identifier, e.g. one passed on the command line.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds the tag stored with API records: `API_<endpoint>_<YYYYMMDD_HHMMSS>`.
#[must_use]
pub fn api_run_tag(endpoint: &str, ts: &Timestamp) -> String {
    format!("API_{endpoint}_{}", compact_timestamp(ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_generated_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let id = RunId::generate_at(&ts);

        assert!(id.as_str().starts_with("RUN_20240309_070501_"));
        let suffix = id.as_str().rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_ne!(RunId::generate_at(&ts), RunId::generate_at(&ts));
    }

    #[test]
    fn test_api_run_tag() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(api_run_tag("users", &ts), "API_users_20240309_070501");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = RunId::new("RUN_X");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"RUN_X\"");
    }
}
