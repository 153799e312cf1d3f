//! Lake path layout
//!
//! The layout is the contract between the extractor and the loader:
//!
//! ```text
//! bronze/{source}/[scope={scope}/]entity={entity}/ingestion_date={YYYY-MM-DD}/run_id={rid}/part-{00001..}.ndjson.gz
//! _meta/{source}/watermarks/[scope={scope}/]entity={entity}.json
//! _meta/{source}/runs/run_id={rid}/manifest.json
//! ```

use chrono::NaiveDate;

use datalift_common::RunId;

pub const PART_SUFFIX: &str = ".ndjson.gz";

/// Prefix covering every bronze object for an entity, across runs.
pub fn bronze_prefix(source: &str, scope: Option<&str>, entity: &str) -> String {
    match scope {
        Some(scope) => format!("bronze/{}/scope={}/entity={}/", source, scope, entity),
        None => format!("bronze/{}/entity={}/", source, entity),
    }
}

/// Prefix for the bronze objects of one run.
pub fn bronze_run_prefix(
    source: &str,
    scope: Option<&str>,
    entity: &str,
    ingestion_date: NaiveDate,
    run_id: &RunId,
) -> String {
    format!(
        "{}ingestion_date={}/run_id={}/",
        bronze_prefix(source, scope, entity),
        ingestion_date.format("%Y-%m-%d"),
        run_id
    )
}

/// Content-addressed part path; a given path is only ever fully rewritten.
pub fn part_path(run_prefix: &str, sequence: u32) -> String {
    format!("{}part-{:05}{}", run_prefix, sequence, PART_SUFFIX)
}

pub fn watermark_path(source: &str, scope: Option<&str>, entity: &str) -> String {
    match scope {
        Some(scope) => format!(
            "_meta/{}/watermarks/scope={}/entity={}.json",
            source, scope, entity
        ),
        None => format!("_meta/{}/watermarks/entity={}.json", source, entity),
    }
}

pub fn manifest_path(source: &str, run_id: &RunId) -> String {
    format!("_meta/{}/runs/run_id={}/manifest.json", source, run_id)
}

pub fn is_part(path: &str) -> bool {
    path.ends_with(PART_SUFFIX)
}

/// Extract the `run_id={...}` segment from a bronze or meta path.
pub fn parse_run_id(path: &str) -> Option<RunId> {
    path.split('/')
        .find_map(|segment| segment.strip_prefix("run_id="))
        .and_then(|rid| rid.parse().ok())
}

/// Extract the `ingestion_date={...}` segment from a bronze path.
pub fn parse_ingestion_date(path: &str) -> Option<NaiveDate> {
    path.split('/')
        .find_map(|segment| segment.strip_prefix("ingestion_date="))
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_id() -> RunId {
        "20260111T120000Z".parse().unwrap()
    }

    #[test]
    fn bronze_paths_with_and_without_scope() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 11).unwrap();

        let prefix = bronze_run_prefix("evo", None, "entries", date, &run_id());
        assert_eq!(
            prefix,
            "bronze/evo/entity=entries/ingestion_date=2026-01-11/run_id=20260111T120000Z/"
        );
        assert_eq!(
            part_path(&prefix, 1),
            "bronze/evo/entity=entries/ingestion_date=2026-01-11/run_id=20260111T120000Z/part-00001.ndjson.gz"
        );

        let scoped = bronze_prefix("pipedrive", Some("comercial"), "deals");
        assert_eq!(scoped, "bronze/pipedrive/scope=comercial/entity=deals/");
    }

    #[test]
    fn meta_paths() {
        assert_eq!(
            watermark_path("zendesk", Some("support"), "tickets"),
            "_meta/zendesk/watermarks/scope=support/entity=tickets.json"
        );
        assert_eq!(
            watermark_path("evo", None, "members"),
            "_meta/evo/watermarks/entity=members.json"
        );
        assert_eq!(
            manifest_path("evo", &run_id()),
            "_meta/evo/runs/run_id=20260111T120000Z/manifest.json"
        );
    }

    #[test]
    fn parses_path_metadata() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 11).unwrap();
        let path = part_path(
            &bronze_run_prefix("evo", Some("br"), "entries", date, &run_id()),
            42,
        );

        assert!(is_part(&path));
        assert_eq!(parse_run_id(&path), Some(run_id()));
        assert_eq!(parse_ingestion_date(&path), Some(date));
        assert_eq!(parse_run_id("bronze/evo/entity=entries/"), None);
    }
}
