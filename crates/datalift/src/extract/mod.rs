//! Extraction stage
//!
//! Plans one run across a set of entities, fans chunk tasks out over a
//! bounded worker pool, writes the run manifest and advances watermarks
//! for the entities that finished clean.

use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{ExtractOptions, SourceConfig};
use crate::entity::{EntityConfig, Pagination};
use crate::lake::{layout, ObjectStore};
use crate::partition::{partition, Period};
use crate::watermark::{Checkpoint, WatermarkStore};
use datalift_common::{DataliftError, Result, RunId};

pub mod manifest;
pub mod worker;
pub mod writer;

pub use manifest::{ChunkResult, EntityReport, PartInfo, RunManifest};
pub use worker::ChunkSpec;

/// A planned extraction run.
pub struct ExtractRequest {
    pub entities: Vec<EntityConfig>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

pub struct Extractor {
    source: SourceConfig,
    scope: Option<String>,
    store: Arc<dyn ObjectStore>,
    watermarks: WatermarkStore,
    options: ExtractOptions,
}

impl Extractor {
    pub fn new(
        source: SourceConfig,
        scope: Option<String>,
        store: Arc<dyn ObjectStore>,
        options: ExtractOptions,
    ) -> Self {
        let watermarks = WatermarkStore::new(store.clone(), source.name.clone(), scope.clone());
        Extractor {
            source,
            scope,
            store,
            watermarks,
            options,
        }
    }

    /// Run a full extraction. Chunk failures do not abort the run; they are
    /// recorded in the manifest and reflected in its error count.
    pub async fn run(&self, request: ExtractRequest) -> Result<RunManifest> {
        if request.entities.is_empty() {
            return Err(DataliftError::config("no entities to extract"));
        }
        let run_id = RunId::generate();
        let run_start = Utc::now();
        let ingestion_date = run_start.date_naive();

        info!(
            run_id = %run_id,
            source = %self.source.name,
            entities = request.entities.len(),
            workers = self.options.workers,
            "Starting extraction run"
        );

        let mut specs = Vec::new();
        for entity in &request.entities {
            entity.validate()?;
            let run_prefix = layout::bronze_run_prefix(
                &self.source.name,
                self.scope.as_deref(),
                &entity.name,
                ingestion_date,
                &run_id,
            );
            specs.extend(self.plan_entity(entity, &request, run_prefix).await?);
        }

        let results = self.run_tasks(specs).await;

        let mut by_entity: BTreeMap<String, Vec<ChunkResult>> = BTreeMap::new();
        for result in results {
            by_entity.entry(result.entity.clone()).or_default().push(result);
        }
        let reports: Vec<EntityReport> = request
            .entities
            .iter()
            .map(|entity| {
                EntityReport::from_chunks(
                    entity.name.clone(),
                    by_entity.remove(&entity.name).unwrap_or_default(),
                )
            })
            .collect();

        let manifest = RunManifest::new(
            run_id.clone(),
            self.source.name.clone(),
            self.scope.clone(),
            run_start,
            reports,
        );

        let path = layout::manifest_path(&self.source.name, &run_id);
        self.store
            .put(&path, serde_json::to_vec_pretty(&manifest)?, Some("application/json"))
            .await?;

        self.advance_watermarks(&request, &manifest, run_start).await?;

        info!(
            run_id = %run_id,
            records = manifest.totals.records,
            parts = manifest.totals.parts,
            errors = manifest.totals.errors,
            "Extraction run finished"
        );
        Ok(manifest)
    }

    /// Turn one entity into its chunk tasks. Date-filtered entities have
    /// their window clipped below by the timestamp watermark; offset ones
    /// are then partitioned into periods while cursor ones page through the
    /// whole window as a single chunk. Cursor entities without a date
    /// filter resume from their persisted cursor; snapshot entities run in
    /// full every time.
    async fn plan_entity(
        &self,
        entity: &EntityConfig,
        request: &ExtractRequest,
        run_prefix: String,
    ) -> Result<Vec<ChunkSpec>> {
        let watermark = self.watermarks.read(&entity.name).await?;

        let make_spec = |period: Option<Period>, cursor: Option<String>| ChunkSpec {
            source: self.source.clone(),
            entity: entity.clone(),
            period,
            cursor,
            run_prefix: run_prefix.clone(),
            retry: self.options.retry,
        };

        match (&entity.pagination, &entity.date_filter) {
            (Pagination::Cursor { .. }, None) => {
                let cursor = watermark.as_ref().and_then(|w| w.cursor().map(String::from));
                Ok(vec![make_spec(None, cursor)])
            },
            (Pagination::Offset { .. }, None) => Ok(vec![make_spec(None, None)]),
            (_, Some(_)) => {
                let mut start = request.start;
                if let Some(since) = watermark
                    .as_ref()
                    .and_then(|w| w.effective_since(self.options.overlap_minutes))
                {
                    start = start.max(since.date_naive());
                }
                if start >= request.end {
                    info!(entity = %entity.name, "Watermark is at or past the requested end, nothing to extract");
                    return Ok(Vec::new());
                }
                match entity.pagination {
                    Pagination::Offset { .. } => Ok(partition(start, request.end, entity.chunk_size)?
                        .into_iter()
                        .map(|period| make_spec(Some(period), None))
                        .collect()),
                    // A cursor walk cannot be split by date.
                    Pagination::Cursor { .. } => {
                        Ok(vec![make_spec(Some(Period::new(start, request.end)), None)])
                    },
                }
            },
        }
    }

    async fn run_tasks(&self, specs: Vec<ChunkSpec>) -> Vec<ChunkResult> {
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut tasks = JoinSet::new();

        for spec in specs {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            tasks.spawn(async move {
                // Closed only if the semaphore is dropped, which cannot
                // happen while tasks hold a clone.
                let _permit = semaphore.acquire().await;
                worker::extract_chunk(spec, store).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Extraction task panicked"),
            }
        }
        results
    }

    /// Watermarks move only for entities that planned at least one chunk
    /// and finished with zero chunk errors. Timestamp checkpoints never
    /// pass the requested window end: a historical backfill covers
    /// `[start, end)`, not "now", and claiming more would clip the
    /// uncovered tail away from every later run.
    async fn advance_watermarks(
        &self,
        request: &ExtractRequest,
        manifest: &RunManifest,
        run_start: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let window_end = request.end.and_time(chrono::NaiveTime::MIN).and_utc();
        let checkpoint_at = run_start.min(window_end);

        for entity in &request.entities {
            let Some(report) = manifest.entities.iter().find(|r| r.entity == entity.name) else {
                continue;
            };
            if report.chunks.is_empty() {
                // Nothing was extracted; rewriting the watermark here could
                // only move it backwards.
                continue;
            }
            if !report.is_clean() {
                warn!(entity = %entity.name, errors = report.errors, "Holding watermark back after chunk errors");
                continue;
            }
            match (&entity.pagination, &entity.date_filter) {
                (Pagination::Cursor { .. }, None) => {
                    if let Some(cursor) = report.last_cursor() {
                        self.watermarks
                            .write(&entity.name, Checkpoint::Cursor(cursor.to_string()))
                            .await?;
                    }
                },
                _ => {
                    self.watermarks
                        .write(&entity.name, Checkpoint::Timestamp(checkpoint_at))
                        .await?;
                },
            }
        }
        Ok(())
    }
}
