//! Bronze part writer
//!
//! Buffered records are serialized as newline-delimited JSON, gzipped and
//! uploaded as sequentially numbered part objects. Uploads go through the
//! transient-retry wrapper; a part is either fully written or reattempted,
//! never appended to.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

use super::manifest::PartInfo;
use crate::lake::{content_checksum, layout, ObjectStore};
use crate::retry::{retry_transient, RetryPolicy};
use datalift_common::Result;

pub fn encode_ndjson_gz(records: &[Value]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for record in records {
        serde_json::to_writer(&mut encoder, record)?;
        encoder.write_all(b"\n")?;
    }
    Ok(encoder.finish()?)
}

pub struct PartWriter {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    retry: RetryPolicy,
    sequence: u32,
    parts: Vec<PartInfo>,
}

impl PartWriter {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, retry: RetryPolicy) -> Self {
        PartWriter {
            store,
            prefix: prefix.into(),
            retry,
            sequence: 0,
            parts: Vec::new(),
        }
    }

    /// Encode and upload one part. Empty batches are skipped.
    pub async fn write_part(&mut self, records: &[Value]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.sequence += 1;
        let path = layout::part_path(&self.prefix, self.sequence);
        let data = encode_ndjson_gz(records)?;
        let checksum = content_checksum(&data);
        let bytes = data.len() as u64;

        retry_transient(&path, &self.retry, || {
            let data = data.clone();
            self.store.put(&path, data, Some("application/gzip"))
        })
        .await?;

        debug!(path = %path, records = records.len(), bytes, "Wrote bronze part");
        self.parts.push(PartInfo {
            path,
            records: records.len() as u64,
            bytes,
            checksum,
        });
        Ok(())
    }

    pub fn into_parts(self) -> Vec<PartInfo> {
        self.parts
    }
}
