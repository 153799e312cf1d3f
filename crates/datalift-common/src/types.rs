//! Shared identifiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DataliftError;

/// Run identifier: a UTC timestamp rendered as `YYYYMMDDTHHMMSSZ`.
///
/// The format sorts lexicographically in chronological order, which is what
/// lets the loader pick the "latest" run by plain string comparison on
/// object paths.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

const RUN_ID_FORMAT: &str = "%Y%m%dT%H%M%SZ";

impl RunId {
    /// Generate a run id from the current UTC time.
    pub fn generate() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        RunId(dt.format(RUN_ID_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = DataliftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        chrono::NaiveDateTime::parse_from_str(s, RUN_ID_FORMAT)
            .map_err(|_| DataliftError::Config(format!("invalid run id: {}", s)))?;
        Ok(RunId(s.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_ids_order_chronologically() {
        let a = RunId::from_datetime(Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap());
        let b = RunId::from_datetime(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        assert!(a < b);
        assert_eq!(a.as_str(), "20251231T235959Z");
    }

    #[test]
    fn run_id_parses_back() {
        let rid = RunId::generate();
        let parsed: RunId = rid.as_str().parse().unwrap();
        assert_eq!(parsed, rid);
    }

    #[test]
    fn invalid_run_id_is_rejected() {
        assert!("not-a-run-id".parse::<RunId>().is_err());
        assert!("2026-01-11".parse::<RunId>().is_err());
    }
}
