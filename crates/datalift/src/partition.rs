//! Period partitioner
//!
//! Splits an extraction date range into fixed-size chunks so that
//! independent workers can process disjoint sub-ranges concurrently. Chunk
//! boundaries are date-aligned; record counts per chunk are therefore
//! approximate, but time coverage is exact.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use datalift_common::{DataliftError, Result};

/// Chunk size policy, chosen per entity by expected record density.
/// High-volume entities use finer chunks to keep each task's runtime
/// bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkSize {
    Day,
    Week,
    #[default]
    Month,
    Quarter,
}

impl ChunkSize {
    fn advance(self, date: NaiveDate) -> NaiveDate {
        match self {
            ChunkSize::Day => date + chrono::Duration::days(1),
            ChunkSize::Week => date + chrono::Duration::days(7),
            ChunkSize::Month => date + Months::new(1),
            ChunkSize::Quarter => date + Months::new(3),
        }
    }
}

impl std::str::FromStr for ChunkSize {
    type Err = DataliftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "day" | "daily" => Ok(ChunkSize::Day),
            "week" | "weekly" => Ok(ChunkSize::Week),
            "month" | "monthly" => Ok(ChunkSize::Month),
            "quarter" | "quarterly" => Ok(ChunkSize::Quarter),
            _ => Err(DataliftError::config(format!("invalid chunk size: {}", s))),
        }
    }
}

/// A contiguous half-open date range `[start, end)` assigned to exactly one
/// extraction task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Period { start, end }
    }

    /// Label used in chunk outcomes and logs.
    pub fn label(&self) -> String {
        format!("{} - {}", self.start, self.end)
    }

    /// Inclusive lower bound for an upstream "updated since" filter.
    pub fn since_filter(&self) -> String {
        format!("{}T00:00:00", self.start)
    }

    /// Exclusive upper bound for an upstream "updated until" filter.
    pub fn until_filter(&self) -> String {
        format!("{}T00:00:00", self.end)
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Split `[start, end)` into ordered, disjoint periods of the given chunk
/// size. The union of the output covers the input exactly; the final chunk
/// is clipped to `end` even if shorter than the nominal size.
pub fn partition(start: NaiveDate, end: NaiveDate, chunk: ChunkSize) -> Result<Vec<Period>> {
    if start >= end {
        return Err(DataliftError::config(format!(
            "invalid extraction range: start {} is not before end {}",
            start, end
        )));
    }

    let mut periods = Vec::new();
    let mut current = start;
    while current < end {
        let next = chunk.advance(current).min(end);
        periods.push(Period::new(current, next));
        current = next;
    }
    Ok(periods)
}
