//! Run manifests
//!
//! Every extraction run writes one manifest describing what it produced:
//! per-chunk outcomes, per-entity rollups and run totals. The loader and
//! operators read these instead of re-listing bronze.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use datalift_common::RunId;

/// One bronze object written by a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    pub path: String,
    pub records: u64,
    pub bytes: u64,
    /// SHA-256 of the compressed object.
    pub checksum: String,
}

/// Outcome of one extraction task. A failed chunk keeps the counts for
/// whatever it managed to upload before the error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub entity: String,
    /// Period label for date-chunked entities; `None` for cursor and
    /// snapshot extractions, which run as a single chunk.
    pub period: Option<String>,
    pub records: u64,
    pub requests: u64,
    pub parts: Vec<PartInfo>,
    pub elapsed_secs: f64,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cursor: Option<String>,
}

impl ChunkResult {
    pub fn bytes(&self) -> u64 {
        self.parts.iter().map(|p| p.bytes).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityReport {
    pub entity: String,
    pub records: u64,
    pub parts: u64,
    pub bytes: u64,
    pub requests: u64,
    pub errors: u64,
    pub chunks: Vec<ChunkResult>,
}

impl EntityReport {
    pub fn from_chunks(entity: impl Into<String>, chunks: Vec<ChunkResult>) -> Self {
        EntityReport {
            entity: entity.into(),
            records: chunks.iter().map(|c| c.records).sum(),
            parts: chunks.iter().map(|c| c.parts.len() as u64).sum(),
            bytes: chunks.iter().map(|c| c.bytes()).sum(),
            requests: chunks.iter().map(|c| c.requests).sum(),
            errors: chunks.iter().filter(|c| c.error.is_some()).count() as u64,
            chunks,
        }
    }

    /// Watermarks only advance for entities whose every chunk succeeded.
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }

    /// Latest cursor any chunk reported, used as the next watermark for
    /// cursor entities.
    pub fn last_cursor(&self) -> Option<&str> {
        self.chunks
            .iter()
            .rev()
            .find_map(|c| c.last_cursor.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunTotals {
    pub records: u64,
    pub parts: u64,
    pub bytes: u64,
    pub requests: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entities: Vec<EntityReport>,
    pub totals: RunTotals,
}

impl RunManifest {
    pub fn new(
        run_id: RunId,
        source: impl Into<String>,
        scope: Option<String>,
        started_at: DateTime<Utc>,
        entities: Vec<EntityReport>,
    ) -> Self {
        let totals = RunTotals {
            records: entities.iter().map(|e| e.records).sum(),
            parts: entities.iter().map(|e| e.parts).sum(),
            bytes: entities.iter().map(|e| e.bytes).sum(),
            requests: entities.iter().map(|e| e.requests).sum(),
            errors: entities.iter().map(|e| e.errors).sum(),
        };
        RunManifest {
            run_id,
            source: source.into(),
            scope,
            started_at,
            finished_at: Utc::now(),
            entities,
            totals,
        }
    }

    pub fn error_count(&self) -> u64 {
        self.totals.errors
    }
}
