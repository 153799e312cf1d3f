//! Load stage
//!
//! Reads bronze parts back, prepares staging rows and merges them into
//! Postgres over a shared pool. Batches fail independently; the report
//! carries per-entity counts and errors for the exit status.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::LoadOptions;
use crate::entity::EntityConfig;
use crate::lake::{layout, ObjectStore};
use crate::retry::retry_transient;
use datalift_common::{DataliftError, Result, RunId};

pub mod batch;
pub mod merge;

use batch::{parse_part, prepare_rows, StagingRow};

/// Which extraction runs to load for each entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSelection {
    /// Only the most recent run present in bronze (the default).
    Latest,
    /// Every run present, oldest first. Converges to the same staging
    /// state because later runs overwrite on key.
    All,
    Specific(RunId),
}

#[derive(Debug, Clone, Default)]
pub struct EntityLoadReport {
    pub entity: String,
    pub parts: u64,
    pub records: u64,
    pub rows_upserted: u64,
    pub malformed: u64,
    pub missing_key: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub entities: Vec<EntityLoadReport>,
}

impl LoadReport {
    pub fn error_count(&self) -> u64 {
        self.entities.iter().map(|e| e.errors).sum()
    }

    pub fn rows_upserted(&self) -> u64 {
        self.entities.iter().map(|e| e.rows_upserted).sum()
    }
}

struct BatchOutcome {
    parts: u64,
    records: u64,
    rows_upserted: u64,
    malformed: u64,
    missing_key: u64,
    error: Option<String>,
}

pub struct Loader {
    source: String,
    scope: Option<String>,
    store: Arc<dyn ObjectStore>,
    pool: sqlx::PgPool,
    options: LoadOptions,
}

impl Loader {
    pub fn new(
        source: impl Into<String>,
        scope: Option<String>,
        store: Arc<dyn ObjectStore>,
        pool: sqlx::PgPool,
        options: LoadOptions,
    ) -> Self {
        Loader {
            source: source.into(),
            scope,
            store,
            pool,
            options,
        }
    }

    pub async fn run(
        &self,
        entities: &[EntityConfig],
        selection: RunSelection,
    ) -> Result<LoadReport> {
        if entities.is_empty() {
            return Err(DataliftError::config("no entities to load"));
        }

        let mut report = LoadReport::default();
        for entity in entities {
            entity.validate()?;
            report.entities.push(self.load_entity(entity, &selection).await?);
        }

        info!(
            rows_upserted = report.rows_upserted(),
            errors = report.error_count(),
            "Load finished"
        );
        Ok(report)
    }

    async fn load_entity(
        &self,
        entity: &EntityConfig,
        selection: &RunSelection,
    ) -> Result<EntityLoadReport> {
        merge::ensure_staging_table(&self.pool, &entity.table).await?;

        let parts = self.select_parts(entity, selection).await?;
        info!(entity = %entity.name, parts = parts.len(), "Loading entity");

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut tasks = JoinSet::new();
        for group in parts.chunks(self.options.parts_per_batch.max(1)) {
            let group = group.to_vec();
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let pool = self.pool.clone();
            let entity = entity.clone();
            let options = self.options.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                load_batch(group, entity, store, pool, options).await
            });
        }

        let mut report = EntityLoadReport {
            entity: entity.name.clone(),
            ..Default::default()
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    report.parts += outcome.parts;
                    report.records += outcome.records;
                    report.rows_upserted += outcome.rows_upserted;
                    report.malformed += outcome.malformed;
                    report.missing_key += outcome.missing_key;
                    if let Some(error) = outcome.error {
                        report.errors += 1;
                        warn!(entity = %report.entity, error = %error, "Load batch failed");
                    }
                },
                Err(e) => {
                    report.errors += 1;
                    warn!(error = %e, "Load task panicked");
                },
            }
        }
        Ok(report)
    }

    /// List the entity's bronze parts and keep those belonging to the
    /// selected run(s).
    async fn select_parts(
        &self,
        entity: &EntityConfig,
        selection: &RunSelection,
    ) -> Result<Vec<String>> {
        let prefix = layout::bronze_prefix(&self.source, self.scope.as_deref(), &entity.name);
        let keys = self.store.list(&prefix).await?;

        let mut by_run: BTreeMap<RunId, Vec<String>> = BTreeMap::new();
        for key in keys {
            if !layout::is_part(&key) {
                continue;
            }
            if let Some(run_id) = layout::parse_run_id(&key) {
                by_run.entry(run_id).or_default().push(key);
            }
        }

        match selection {
            RunSelection::All => Ok(by_run.into_values().flatten().collect()),
            // Run ids order chronologically, so the last key is the latest run.
            RunSelection::Latest => Ok(by_run.pop_last().map(|(_, v)| v).unwrap_or_default()),
            RunSelection::Specific(run_id) => by_run.remove(run_id).ok_or_else(|| {
                DataliftError::config(format!(
                    "no bronze parts for entity {} in run {}",
                    entity.name, run_id
                ))
            }),
        }
    }
}

/// Download, decode and merge one group of parts as a single transaction.
/// Transient failures retry the whole batch, which is safe because the
/// merge is idempotent.
async fn load_batch(
    parts: Vec<String>,
    entity: EntityConfig,
    store: Arc<dyn ObjectStore>,
    pool: sqlx::PgPool,
    options: LoadOptions,
) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        parts: 0,
        records: 0,
        rows_upserted: 0,
        malformed: 0,
        missing_key: 0,
        error: None,
    };

    let mut rows: Vec<StagingRow> = Vec::new();
    for part in &parts {
        let prepared = async {
            let data = retry_transient(part, &options.retry, || store.get(part)).await?;
            let parsed = parse_part(&data)?;
            let run_id = layout::parse_run_id(part).ok_or_else(|| {
                DataliftError::config(format!("part path has no run_id segment: {}", part))
            })?;
            let ingestion_date = layout::parse_ingestion_date(part);
            outcome.malformed += parsed.malformed;
            outcome.records += parsed.records.len() as u64;
            prepare_rows(&parsed.records, &entity.key, part, &run_id, ingestion_date)
        }
        .await;

        match prepared {
            Ok(prepared) => {
                outcome.parts += 1;
                outcome.missing_key += prepared.missing_key;
                rows.extend(prepared.rows);
            },
            Err(e) => {
                outcome.error = Some(format!("preparing {}: {}", part, e));
                return outcome;
            },
        }
    }

    match retry_transient(&entity.table, &options.retry, || {
        merge::merge_batch(&pool, &entity.table, &rows)
    })
    .await
    {
        Ok(upserted) => outcome.rows_upserted += upserted,
        Err(e) => outcome.error = Some(format!("merging into {}: {}", entity.table, e)),
    }
    outcome
}
