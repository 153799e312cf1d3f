//! Chunk extraction task
//!
//! One task walks one chunk of one entity: its own API client and rate
//! limiter, a buffered part writer, and an outcome that survives partial
//! failure. A chunk that dies mid-walk keeps whatever parts it already
//! uploaded; the idempotent loader makes the re-extraction harmless.

use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, instrument};

use super::manifest::ChunkResult;
use super::writer::PartWriter;
use crate::config::SourceConfig;
use crate::entity::{EntityConfig, Pagination};
use crate::lake::ObjectStore;
use crate::partition::Period;
use crate::ratelimit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::source::{is_deleted, ApiClient, CursorPager, OffsetPager};
use datalift_common::Result;

/// Everything one extraction task needs, owned so it can move into a
/// spawned task.
pub struct ChunkSpec {
    pub source: SourceConfig,
    pub entity: EntityConfig,
    /// Date window for chunked entities; `None` for cursor and snapshot
    /// extractions.
    pub period: Option<Period>,
    /// Persisted cursor to resume from, for cursor entities.
    pub cursor: Option<String>,
    /// Bronze prefix for this run and entity.
    pub run_prefix: String,
    pub retry: RetryPolicy,
}

impl ChunkSpec {
    fn chunk_label(&self) -> String {
        match &self.period {
            Some(period) => period.start.to_string(),
            None => "full".to_string(),
        }
    }

    fn query_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self.entity.static_filters.clone();
        if let (Some(period), Some(filter)) = (&self.period, &self.entity.date_filter) {
            params.push((filter.since_param.clone(), period.since_filter()));
            params.push((filter.until_param.clone(), period.until_filter()));
        }
        params
    }
}

/// Run one chunk to completion. Never returns `Err`: failures are folded
/// into the outcome so sibling chunks keep running.
#[instrument(skip_all, fields(entity = %spec.entity.name, chunk = %spec.chunk_label()))]
pub async fn extract_chunk(spec: ChunkSpec, store: Arc<dyn ObjectStore>) -> ChunkResult {
    let started = std::time::Instant::now();
    let label = spec.chunk_label();

    let prefix = format!("{}chunk={}/", spec.run_prefix, label);
    let mut writer = PartWriter::new(store, prefix, spec.retry);
    let mut limiter =
        RateLimiter::new(spec.source.rpm).with_unrestricted_window(spec.source.unrestricted_window);

    let mut records = 0u64;
    let mut last_cursor = None;
    let error = match walk_pages(&spec, &mut writer, &mut limiter, &mut records, &mut last_cursor)
        .await
    {
        Ok(()) => {
            info!(records, elapsed_secs = started.elapsed().as_secs_f64(), "Chunk complete");
            None
        },
        Err(e) => {
            error!(records, error = %e, "Chunk failed");
            Some(e.to_string())
        },
    };

    ChunkResult {
        entity: spec.entity.name.clone(),
        period: spec.period.map(|p| p.label()),
        records,
        requests: limiter.request_count(),
        parts: writer.into_parts(),
        elapsed_secs: started.elapsed().as_secs_f64(),
        error,
        last_cursor,
    }
}

async fn walk_pages(
    spec: &ChunkSpec,
    writer: &mut PartWriter,
    limiter: &mut RateLimiter,
    records: &mut u64,
    last_cursor: &mut Option<String>,
) -> Result<()> {
    let client = ApiClient::new(&spec.source)?;
    let params = spec.query_params();
    let mut buffer: Vec<Value> = Vec::new();

    match spec.entity.pagination {
        Pagination::Offset { take } => {
            let mut pager = OffsetPager::new(spec.entity.path.clone(), take, params);
            while let Some(page) = pager.next_page(&client, limiter, &spec.retry).await? {
                buffer_page(page, &mut buffer, records);
                flush_full_batches(spec, writer, &mut buffer).await?;
            }
        },
        Pagination::Cursor { page_size } => {
            let mut pager = CursorPager::new(spec.entity.path.clone(), page_size, params)
                .with_cursor(spec.cursor.clone());
            while let Some(page) = pager.next_page(&client, limiter, &spec.retry).await? {
                buffer_page(page, &mut buffer, records);
                flush_full_batches(spec, writer, &mut buffer).await?;
            }
            *last_cursor = pager.last_cursor().map(|c| c.to_string());
        },
    }

    writer.write_part(&buffer).await
}

fn buffer_page(page: Vec<Value>, buffer: &mut Vec<Value>, records: &mut u64) {
    for record in page {
        if is_deleted(&record) {
            continue;
        }
        *records += 1;
        buffer.push(record);
    }
}

async fn flush_full_batches(
    spec: &ChunkSpec,
    writer: &mut PartWriter,
    buffer: &mut Vec<Value>,
) -> Result<()> {
    while buffer.len() >= spec.entity.batch_size {
        let batch: Vec<Value> = buffer.drain(..spec.entity.batch_size).collect();
        writer.write_part(&batch).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceAuth;
    use crate::lake::memory::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec_for(server: &MockServer, entity: EntityConfig) -> ChunkSpec {
        ChunkSpec {
            source: SourceConfig {
                name: "evo".to_string(),
                base_url: server.uri(),
                auth: SourceAuth::None,
                request_timeout_secs: 5,
                rpm: 60_000,
                unrestricted_window: None,
            },
            entity,
            period: None,
            cursor: None,
            run_prefix: "bronze/evo/entity=test/d/r/".to_string(),
            retry: RetryPolicy::new(2, Duration::from_millis(1)),
        }
    }

    #[tokio::test]
    async fn snapshot_chunk_writes_parts_and_filters_deleted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/pipelines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1},
                {"id": 2, "deleted": true},
                {"id": 3}
            ])))
            .mount(&server)
            .await;

        let entity = EntityConfig::offset("pipelines", "/api/v2/pipelines", 100);
        let store = Arc::new(MemoryStore::new());
        let result = extract_chunk(spec_for(&server, entity), store.clone()).await;

        assert!(result.error.is_none());
        assert_eq!(result.records, 2);
        assert_eq!(result.parts.len(), 1);
        assert!(result.parts[0].path.starts_with("bronze/evo/entity=test/d/r/chunk=full/"));
        assert_eq!(store.object_count(), 1);
    }

    #[tokio::test]
    async fn batch_size_bounds_part_size() {
        let server = MockServer::start().await;
        let page: Vec<_> = (0..5).map(|i| json!({"id": i})).collect();
        Mock::given(method("GET"))
            .and(path("/api/v1/entries"))
            .and(query_param("skip", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(page)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/entries"))
            .and(query_param("skip", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let entity = EntityConfig::offset("entries", "/api/v1/entries", 5).with_batch_size(2);
        let store = Arc::new(MemoryStore::new());
        let result = extract_chunk(spec_for(&server, entity), store).await;

        assert!(result.error.is_none());
        assert_eq!(result.records, 5);
        // 2 + 2 + trailing 1
        assert_eq!(result.parts.len(), 3);
        assert_eq!(result.parts.iter().map(|p| p.records).sum::<u64>(), 5);
    }

    #[tokio::test]
    async fn failed_chunk_keeps_partial_counts() {
        let server = MockServer::start().await;
        let page: Vec<_> = (0..3).map(|i| json!({"id": i})).collect();
        Mock::given(method("GET"))
            .and(path("/api/v1/entries"))
            .and(query_param("skip", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(page)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/entries"))
            .and(query_param("skip", "3"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let entity = EntityConfig::offset("entries", "/api/v1/entries", 3).with_batch_size(2);
        let store = Arc::new(MemoryStore::new());
        let result = extract_chunk(spec_for(&server, entity), store).await;

        assert!(result.error.is_some());
        assert_eq!(result.records, 3);
        // The full batch flushed before the failure survives.
        assert_eq!(result.parts.len(), 1);
        assert_eq!(result.parts[0].records, 2);
    }
}
