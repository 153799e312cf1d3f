//! Load batch preparation
//!
//! Turns bronze parts back into staging rows: gunzip, line-parse, key
//! derivation and COPY text encoding. Malformed lines and records without
//! a usable key are skipped and counted, never fatal.

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::{BufRead, BufReader};

use crate::entity::KeySpec;
use datalift_common::{Result, RunId};

/// Width of the derived key space. Keys are reduced modulo this so they fit
/// comfortably in downstream integer columns.
const DERIVED_KEY_MODULUS: u64 = 1_000_000_000_000_000;

/// One row bound for the staging table.
#[derive(Debug, Clone)]
pub struct StagingRow {
    pub record_key: String,
    pub payload: String,
    pub source_object_path: String,
    pub run_id: String,
    pub ingestion_date: Option<NaiveDate>,
}

/// Records decoded from one part plus the count of lines that would not
/// parse as JSON.
pub struct ParsedPart {
    pub records: Vec<Value>,
    pub malformed: u64,
}

pub fn parse_part(data: &[u8]) -> Result<ParsedPart> {
    let reader = BufReader::new(GzDecoder::new(data));
    let mut records = Vec::new();
    let mut malformed = 0u64;
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(value) => records.push(value),
            Err(_) => malformed += 1,
        }
    }
    Ok(ParsedPart { records, malformed })
}

/// Deterministic staging key for a record, or `None` when the key fields
/// are absent.
pub fn derive_key(record: &Value, key: &KeySpec) -> Option<String> {
    match key {
        KeySpec::Natural(field) => record.get(field).and_then(scalar_to_string),
        KeySpec::Derived(fields) => {
            let mut values = Vec::with_capacity(fields.len());
            for field in fields {
                values.push(scalar_to_string(record.get(field)?)?);
            }
            Some(hash_key(&values.join("|")).to_string())
        },
    }
}

/// First 15 hex digits of the md5, reduced to a fixed-width integer. The
/// same logical record always maps to the same key, which is what makes
/// re-ingestion idempotent for sources without natural ids.
fn hash_key(joined: &str) -> u64 {
    let digest = md5::compute(joined.as_bytes());
    let hex = format!("{:x}", digest);
    // 15 hex digits always fit in a u64.
    u64::from_str_radix(&hex[..15], 16).unwrap_or(0) % DERIVED_KEY_MODULUS
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Rows ready for COPY plus the count of records skipped for missing keys.
pub struct PreparedRows {
    pub rows: Vec<StagingRow>,
    pub missing_key: u64,
}

pub fn prepare_rows(
    records: &[Value],
    key: &KeySpec,
    part_path: &str,
    run_id: &RunId,
    ingestion_date: Option<NaiveDate>,
) -> Result<PreparedRows> {
    let mut rows = Vec::with_capacity(records.len());
    let mut missing_key = 0u64;
    for record in records {
        let Some(record_key) = derive_key(record, key) else {
            missing_key += 1;
            continue;
        };
        rows.push(StagingRow {
            record_key,
            payload: serde_json::to_string(record)?,
            source_object_path: part_path.to_string(),
            run_id: run_id.to_string(),
            ingestion_date,
        });
    }
    Ok(PreparedRows { rows, missing_key })
}

/// COPY text format: tab-separated columns, one row per line, `\N` for
/// SQL NULL.
pub fn encode_copy_rows(rows: &[StagingRow]) -> String {
    let mut out = String::new();
    for row in rows {
        out.push_str(&copy_escape(&row.record_key));
        out.push('\t');
        out.push_str(&copy_escape(&row.payload));
        out.push('\t');
        out.push_str(&copy_escape(&row.source_object_path));
        out.push('\t');
        out.push_str(&copy_escape(&row.run_id));
        out.push('\t');
        match row.ingestion_date {
            Some(date) => out.push_str(&date.format("%Y-%m-%d").to_string()),
            None => out.push_str("\\N"),
        }
        out.push('\n');
    }
    out
}

fn copy_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::writer::encode_ndjson_gz;
    use serde_json::json;

    #[test]
    fn parse_part_counts_malformed_lines() {
        let good = encode_ndjson_gz(&[json!({"id": 1}), json!({"id": 2})]).unwrap();
        let parsed = parse_part(&good).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.malformed, 0);

        let mut raw = Vec::new();
        {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            use std::io::Write;
            let mut enc = GzEncoder::new(&mut raw, Compression::default());
            enc.write_all(b"{\"id\": 1}\nnot json\n{\"id\": 2}\n").unwrap();
            enc.finish().unwrap();
        }
        let parsed = parse_part(&raw).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.malformed, 1);
    }

    #[test]
    fn natural_key_from_number_or_string() {
        let key = KeySpec::Natural("id".to_string());
        assert_eq!(derive_key(&json!({"id": 42}), &key), Some("42".to_string()));
        assert_eq!(derive_key(&json!({"id": "a-1"}), &key), Some("a-1".to_string()));
        assert_eq!(derive_key(&json!({"name": "x"}), &key), None);
        assert_eq!(derive_key(&json!({"id": null}), &key), None);
    }

    #[test]
    fn derived_key_is_stable_and_bounded() {
        let key = KeySpec::Derived(vec!["date".to_string(), "idMember".to_string()]);
        let record = json!({"date": "2026-01-11T10:00:00", "idMember": 77, "extra": "ignored"});

        let a = derive_key(&record, &key).unwrap();
        let b = derive_key(&record, &key).unwrap();
        assert_eq!(a, b);
        assert!(a.parse::<u64>().unwrap() < DERIVED_KEY_MODULUS);

        // A different identifying tuple produces a different key.
        let other = json!({"date": "2026-01-11T10:00:00", "idMember": 78});
        assert_ne!(derive_key(&other, &key).unwrap(), a);

        // Missing component means no key.
        assert_eq!(derive_key(&json!({"date": "x"}), &key), None);
    }

    #[test]
    fn copy_encoding_escapes_control_characters() {
        let rows = vec![StagingRow {
            record_key: "k1".to_string(),
            payload: "{\"note\": \"line\\nbreak\\ttab\"}".to_string(),
            source_object_path: "bronze/a/part-00001.ndjson.gz".to_string(),
            run_id: "20260111T120000Z".to_string(),
            ingestion_date: None,
        }];
        let encoded = encode_copy_rows(&rows);
        let line = encoded.lines().next().unwrap();
        assert_eq!(line.split('\t').count(), 5);
        assert!(line.ends_with("\\N"));
        assert!(encoded.contains("\\\\n"));
    }

    #[test]
    fn prepare_rows_skips_keyless_records() {
        let run_id: RunId = "20260111T120000Z".parse().unwrap();
        let records = vec![json!({"id": 1}), json!({"noid": true}), json!({"id": 2})];
        let prepared = prepare_rows(
            &records,
            &KeySpec::Natural("id".to_string()),
            "bronze/x/part-00001.ndjson.gz",
            &run_id,
            None,
        )
        .unwrap();
        assert_eq!(prepared.rows.len(), 2);
        assert_eq!(prepared.missing_key, 1);
    }
}
