//! Loader integration tests against a real Postgres via testcontainers.
//!
//! Requires a local Docker daemon; run with `cargo test -- --ignored`.

use chrono::NaiveDate;
use datalift::config::LoadOptions;
use datalift::entity::EntityConfig;
use datalift::extract::writer::encode_ndjson_gz;
use datalift::lake::memory::MemoryStore;
use datalift::lake::{layout, ObjectStore};
use datalift::load::{Loader, RunSelection};
use datalift::retry::RetryPolicy;
use datalift::RunId;
use serde_json::{json, Value};
use serial_test::serial;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers_modules::postgres::Postgres;

async fn start_postgres() -> (testcontainers::ContainerAsync<Postgres>, PgPool) {
    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("failed to start postgres container");
    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("container port");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            host, port
        ))
        .await
        .expect("failed to connect to postgres");
    datalift::db::health_check(&pool)
        .await
        .expect("pool failed its health check");
    (container, pool)
}

/// Write one bronze part for the entity under the standard layout.
async fn put_part(
    store: &MemoryStore,
    run_id: &RunId,
    sequence: u32,
    records: &[Value],
) -> String {
    let prefix = layout::bronze_run_prefix(
        "evo",
        None,
        "entries",
        NaiveDate::from_ymd_opt(2026, 1, 11).unwrap(),
        run_id,
    );
    let path = layout::part_path(&prefix, sequence);
    store
        .put(&path, encode_ndjson_gz(records).unwrap(), None)
        .await
        .unwrap();
    path
}

fn test_entity() -> EntityConfig {
    EntityConfig::offset("entries", "/api/v1/entries", 1000).with_table("stg_evo.entries_raw")
}

fn fast_options() -> LoadOptions {
    LoadOptions {
        workers: 2,
        parts_per_batch: 10,
        retry: RetryPolicy::new(2, Duration::from_millis(10)),
    }
}

async fn staging_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT count(*) FROM stg_evo.entries_raw")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn latest_run_load_is_idempotent() {
    let (_container, pool) = start_postgres().await;
    let store = Arc::new(MemoryStore::new());

    let old_run: RunId = "20260110T080000Z".parse().unwrap();
    let new_run: RunId = "20260111T080000Z".parse().unwrap();

    put_part(
        &store,
        &old_run,
        1,
        &[json!({"id": 1, "v": "old"}), json!({"id": 2, "v": "old"})],
    )
    .await;
    put_part(
        &store,
        &new_run,
        1,
        &[json!({"id": 1, "v": "new"}), json!({"id": 3, "v": "new"})],
    )
    .await;

    let loader = Loader::new("evo", None, store.clone(), pool.clone(), fast_options());
    let entities = vec![test_entity()];

    // Latest selects only the newer run.
    let report = loader.run(&entities, RunSelection::Latest).await.unwrap();
    assert_eq!(report.error_count(), 0);
    assert_eq!(report.entities[0].parts, 1);
    assert_eq!(report.entities[0].records, 2);
    assert_eq!(staging_count(&pool).await, 2);

    // Replaying the same selection converges to the same state.
    let replay = loader.run(&entities, RunSelection::Latest).await.unwrap();
    assert_eq!(replay.error_count(), 0);
    assert_eq!(staging_count(&pool).await, 2);

    let v: String = sqlx::query_scalar(
        "SELECT payload->>'v' FROM stg_evo.entries_raw WHERE record_key = '1'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(v, "new");
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn all_runs_prefer_the_newest_payload_per_key() {
    let (_container, pool) = start_postgres().await;
    let store = Arc::new(MemoryStore::new());

    let old_run: RunId = "20260110T080000Z".parse().unwrap();
    let new_run: RunId = "20260111T080000Z".parse().unwrap();
    put_part(&store, &old_run, 1, &[json!({"id": 1, "v": "old"})]).await;
    put_part(&store, &new_run, 1, &[json!({"id": 1, "v": "new"})]).await;

    let loader = Loader::new("evo", None, store.clone(), pool.clone(), fast_options());
    let entities = vec![test_entity()];

    // Both parts fall into one batch, where the newest run id wins the key.
    let report = loader.run(&entities, RunSelection::All).await.unwrap();
    assert_eq!(report.error_count(), 0);
    assert_eq!(report.entities[0].parts, 2);
    assert_eq!(staging_count(&pool).await, 1);

    let v: String = sqlx::query_scalar(
        "SELECT payload->>'v' FROM stg_evo.entries_raw WHERE record_key = '1'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(v, "new");
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn malformed_and_keyless_records_are_skipped_not_fatal() {
    let (_container, pool) = start_postgres().await;
    let store = Arc::new(MemoryStore::new());

    let run: RunId = "20260111T080000Z".parse().unwrap();
    put_part(
        &store,
        &run,
        1,
        &[json!({"id": 10}), json!({"noid": true}), json!({"id": 11})],
    )
    .await;

    let loader = Loader::new("evo", None, store.clone(), pool.clone(), fast_options());
    let report = loader
        .run(&[test_entity()], RunSelection::Latest)
        .await
        .unwrap();

    assert_eq!(report.error_count(), 0);
    assert_eq!(report.entities[0].missing_key, 1);
    assert_eq!(staging_count(&pool).await, 2);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn specific_run_selection_errors_when_absent() {
    let (_container, pool) = start_postgres().await;
    let store = Arc::new(MemoryStore::new());

    let loader = Loader::new("evo", None, store, pool, fast_options());
    let missing: RunId = "20250101T000000Z".parse().unwrap();
    let result = loader
        .run(&[test_entity()], RunSelection::Specific(missing))
        .await;
    assert!(result.is_err());
}
