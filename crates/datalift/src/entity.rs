//! Entity configuration
//!
//! An [`EntityConfig`] describes how one upstream collection is extracted
//! and loaded: its API path, pagination protocol, chunking policy, staging
//! key derivation, and staging table. The engine is otherwise agnostic to
//! what the records mean.

use serde::{Deserialize, Serialize};

use crate::partition::ChunkSize;
use datalift_common::{DataliftError, Result};

/// Pagination protocol spoken by the entity's endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pagination {
    /// skip/take paging; terminates on a short or empty page.
    Offset { take: usize },
    /// Opaque server-issued cursor; terminates on an explicit end-of-stream
    /// signal or an explicit null next-cursor.
    Cursor { page_size: usize },
}

/// How the deterministic staging key is obtained for a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySpec {
    /// The source carries a stable natural id in this field.
    Natural(String),
    /// No natural id: hash a tuple of semantically-identifying fields into
    /// a fixed-width integer, so re-ingesting the same logical record is
    /// idempotent.
    Derived(Vec<String>),
}

/// Names of the upstream query parameters bounding an update-time filter.
/// Entities without date filters are extracted as full snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateFilter {
    pub since_param: String,
    pub until_param: String,
}

/// Per-entity extraction and load configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Entity name as it appears in bronze paths (e.g. "entries").
    pub name: String,
    /// API path relative to the source base URL (e.g. "/api/v1/entries").
    pub path: String,
    pub pagination: Pagination,
    /// Chunking policy for the period partitioner. Ignored for cursor
    /// entities, which walk their whole window as a single chunk.
    pub chunk_size: ChunkSize,
    pub key: KeySpec,
    /// Update-time filter parameter names. With a filter the entity is
    /// windowed by a timestamp watermark; without one, offset entities are
    /// full snapshots and cursor entities resume from a persisted cursor.
    pub date_filter: Option<DateFilter>,
    /// Static query parameters sent with every page request (e.g. a status
    /// filter excluding deleted records).
    pub static_filters: Vec<(String, String)>,
    /// Durable staging table, schema-qualified (e.g. "stg_evo.entries_raw").
    pub table: String,
    /// Records buffered in memory before a bronze part is flushed.
    pub batch_size: usize,
}

impl EntityConfig {
    pub fn offset(name: impl Into<String>, path: impl Into<String>, take: usize) -> Self {
        let name = name.into();
        let table = format!("stg.{}_raw", name);
        EntityConfig {
            name,
            path: path.into(),
            pagination: Pagination::Offset { take },
            chunk_size: ChunkSize::Month,
            key: KeySpec::Natural("id".to_string()),
            date_filter: None,
            static_filters: Vec::new(),
            table,
            batch_size: 10_000,
        }
    }

    pub fn cursor(name: impl Into<String>, path: impl Into<String>, page_size: usize) -> Self {
        let mut config = Self::offset(name, path, page_size);
        config.pagination = Pagination::Cursor { page_size };
        config
    }

    pub fn with_chunk_size(mut self, chunk_size: ChunkSize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_key(mut self, key: KeySpec) -> Self {
        self.key = key;
        self
    }

    pub fn with_date_filter(
        mut self,
        since_param: impl Into<String>,
        until_param: impl Into<String>,
    ) -> Self {
        self.date_filter = Some(DateFilter {
            since_param: since_param.into(),
            until_param: until_param.into(),
        });
        self
    }

    pub fn with_static_filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_filters.push((name.into(), value.into()));
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Snapshot entities have no update-time filter and are re-extracted in
    /// full each run.
    pub fn is_snapshot(&self) -> bool {
        self.date_filter.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DataliftError::config("entity name cannot be empty"));
        }
        if !self.path.starts_with('/') {
            return Err(DataliftError::config(format!(
                "entity path must start with '/': {}",
                self.path
            )));
        }
        if self.batch_size == 0 {
            return Err(DataliftError::config("entity batch_size must be > 0"));
        }
        match &self.key {
            KeySpec::Natural(field) if field.is_empty() => {
                Err(DataliftError::config("natural key field cannot be empty"))
            },
            KeySpec::Derived(fields) if fields.is_empty() => Err(DataliftError::config(
                "derived key needs at least one field",
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_entity_defaults() {
        let entity = EntityConfig::offset("entries", "/api/v1/entries", 1000)
            .with_chunk_size(ChunkSize::Week)
            .with_date_filter("registerDateStart", "registerDateEnd")
            .with_key(KeySpec::Derived(vec![
                "date".to_string(),
                "idMember".to_string(),
            ]));

        assert_eq!(entity.pagination, Pagination::Offset { take: 1000 });
        assert_eq!(entity.table, "stg.entries_raw");
        assert!(!entity.is_snapshot());
        entity.validate().unwrap();
    }

    #[test]
    fn snapshot_entity_has_no_date_filter() {
        let entity = EntityConfig::offset("pipelines", "/api/v2/pipelines", 500);
        assert!(entity.is_snapshot());
    }

    #[test]
    fn validation_rejects_bad_configs() {
        let mut entity = EntityConfig::offset("deals", "api/v2/deals", 500);
        assert!(entity.validate().is_err());

        entity.path = "/api/v2/deals".to_string();
        entity.validate().unwrap();

        entity.key = KeySpec::Derived(Vec::new());
        assert!(entity.validate().is_err());
    }
}
