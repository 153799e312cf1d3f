//! Watermarks
//!
//! One small JSON object per entity recording where extraction stopped.
//! Watermarks are only advanced after an entity finishes a run without
//! errors, so a failed run re-extracts from the previous checkpoint and
//! the idempotent loader absorbs the duplicates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::lake::{layout, ObjectStore};
use datalift_common::{DataliftError, Result};

/// Resume point for one entity.
///
/// Untagged on the wire; timestamps are tried first, so a cursor that
/// happens to look like an RFC 3339 instant must not be used as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Checkpoint {
    /// Upstream update-time filters resume from here (offset entities).
    Timestamp(DateTime<Utc>),
    /// Server-issued pagination cursor (cursor entities).
    Cursor(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watermark {
    pub checkpoint: Checkpoint,
    pub updated_at: DateTime<Utc>,
}

impl Watermark {
    pub fn new(checkpoint: Checkpoint) -> Self {
        Watermark {
            checkpoint,
            updated_at: Utc::now(),
        }
    }

    /// Lower bound for the next incremental window. The overlap absorbs
    /// upstream commits whose update timestamp landed just before the
    /// watermark was taken.
    pub fn effective_since(&self, overlap_minutes: i64) -> Option<DateTime<Utc>> {
        match &self.checkpoint {
            Checkpoint::Timestamp(ts) => Some(*ts - Duration::minutes(overlap_minutes)),
            Checkpoint::Cursor(_) => None,
        }
    }

    pub fn cursor(&self) -> Option<&str> {
        match &self.checkpoint {
            Checkpoint::Cursor(cursor) => Some(cursor),
            Checkpoint::Timestamp(_) => None,
        }
    }
}

/// Reads and writes per-entity watermarks under `_meta/{source}/watermarks/`.
#[derive(Clone)]
pub struct WatermarkStore {
    store: Arc<dyn ObjectStore>,
    source: String,
    scope: Option<String>,
}

impl WatermarkStore {
    pub fn new(store: Arc<dyn ObjectStore>, source: impl Into<String>, scope: Option<String>) -> Self {
        WatermarkStore {
            store,
            source: source.into(),
            scope,
        }
    }

    pub async fn read(&self, entity: &str) -> Result<Option<Watermark>> {
        let path = layout::watermark_path(&self.source, self.scope.as_deref(), entity);
        match self.store.get(&path).await {
            Ok(data) => {
                let watermark: Watermark = serde_json::from_slice(&data)?;
                debug!(entity = %entity, checkpoint = ?watermark.checkpoint, "Read watermark");
                Ok(Some(watermark))
            },
            Err(DataliftError::ObjectNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn write(&self, entity: &str, checkpoint: Checkpoint) -> Result<()> {
        let path = layout::watermark_path(&self.source, self.scope.as_deref(), entity);
        let watermark = Watermark::new(checkpoint);
        let data = serde_json::to_vec_pretty(&watermark)?;
        self.store.put(&path, data, Some("application/json")).await?;
        info!(entity = %entity, checkpoint = ?watermark.checkpoint, "Advanced watermark");
        Ok(())
    }
}
