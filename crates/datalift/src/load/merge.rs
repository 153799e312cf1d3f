//! Staging merge
//!
//! One batch is one transaction: COPY the rows into a session-local temp
//! table, then upsert into the durable staging table keyed on record_key.
//! Replaying the same parts lands on the same keys, so reloads converge
//! instead of duplicating.

use sqlx::postgres::PgPool;
use sqlx::Connection;
use tracing::debug;

use super::batch::{encode_copy_rows, StagingRow};
use datalift_common::{DataliftError, Result};

const STAGING_COLUMNS: &str = "record_key, payload, source_object_path, run_id, ingestion_date";

/// Staging tables and schemas come from entity configuration, which is
/// interpolated into DDL. Restrict them to plain identifiers.
pub fn validate_table_name(table: &str) -> Result<()> {
    let mut parts = table.split('.');
    let valid = |s: &str| {
        !s.is_empty()
            && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    match (parts.next(), parts.next(), parts.next()) {
        (Some(schema), Some(name), None) if valid(schema) && valid(name) => Ok(()),
        (Some(name), None, None) if valid(name) => Ok(()),
        _ => Err(DataliftError::config(format!(
            "invalid staging table name: {}",
            table
        ))),
    }
}

/// Create the schema and staging table if they do not exist yet.
pub async fn ensure_staging_table(pool: &PgPool, table: &str) -> Result<()> {
    validate_table_name(table)?;

    if let Some((schema, _)) = table.split_once('.') {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(pool)
            .await?;
    }

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            record_key TEXT PRIMARY KEY,
            payload JSONB NOT NULL,
            source_object_path TEXT NOT NULL,
            run_id TEXT NOT NULL,
            ingestion_date DATE,
            loaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        table
    ))
    .execute(pool)
    .await?;
    Ok(())
}

/// COPY + upsert one batch of rows inside a single transaction. Returns the
/// number of staging rows inserted or refreshed.
pub async fn merge_batch(pool: &PgPool, table: &str, rows: &[StagingRow]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    validate_table_name(table)?;

    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    sqlx::query(&format!(
        "CREATE TEMP TABLE staging_batch (LIKE {} INCLUDING DEFAULTS) ON COMMIT DROP",
        table
    ))
    .execute(&mut *tx)
    .await?;

    let mut copy = tx
        .copy_in_raw(&format!(
            "COPY staging_batch ({}) FROM STDIN WITH (FORMAT text)",
            STAGING_COLUMNS
        ))
        .await?;
    copy.send(encode_copy_rows(rows).into_bytes()).await?;
    copy.finish().await?;

    // DISTINCT ON collapses intra-batch duplicates before the upsert, since
    // ON CONFLICT cannot touch the same row twice in one statement. The
    // lexicographically greatest run_id wins, which is also the newest.
    let upserted = sqlx::query(&format!(
        "INSERT INTO {table} ({cols}, loaded_at)
         SELECT DISTINCT ON (record_key) {cols}, now()
         FROM staging_batch
         ORDER BY record_key, run_id DESC
         ON CONFLICT (record_key) DO UPDATE SET
             payload = EXCLUDED.payload,
             source_object_path = EXCLUDED.source_object_path,
             run_id = EXCLUDED.run_id,
             ingestion_date = EXCLUDED.ingestion_date,
             loaded_at = EXCLUDED.loaded_at",
        table = table,
        cols = STAGING_COLUMNS,
    ))
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    debug!(table = %table, rows = rows.len(), upserted, "Merged batch");
    Ok(upserted)
}
