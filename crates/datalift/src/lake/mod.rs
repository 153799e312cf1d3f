//! Object storage ("lake") access
//!
//! All bronze objects, watermarks and manifests live behind the
//! [`ObjectStore`] trait. Production uses [`S3Store`]; tests and dry runs
//! use [`memory::MemoryStore`].

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::config::S3Config;
use datalift_common::{DataliftError, Result};

pub mod layout;
pub mod memory;

/// Minimal object-store surface the pipeline needs. Writes are full-object
/// overwrites; there is no append.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, overwriting any existing object at `key`.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<()>;

    /// Read a whole object. Returns [`DataliftError::ObjectNotFound`] when
    /// the key does not exist.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// List all keys under a prefix, sorted ascending.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// S3-compatible object store (AWS S3 or MinIO with a custom endpoint).
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(config: &S3Config) -> Self {
        debug!(bucket = %config.bucket, region = %config.region, "Initializing S3 store");

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "datalift-lake",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style)
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest());

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!(bucket = %config.bucket, "S3 store initialized");

        S3Store {
            client,
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        request
            .send()
            .await
            .map_err(|e| DataliftError::storage(format!("put s3://{}/{}: {}", self.bucket, key, e)))?;

        debug!(key = %key, "Uploaded object");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.as_service_error();
                if service_err.map(|s| s.is_no_such_key()).unwrap_or(false) {
                    DataliftError::ObjectNotFound(key.to_string())
                } else {
                    DataliftError::storage(format!("get s3://{}/{}: {}", self.bucket, key, e))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| DataliftError::storage(format!("read s3://{}/{}: {}", self.bucket, key, e)))?
            .into_bytes()
            .to_vec();

        debug!(key = %key, bytes = data.len(), "Downloaded object");
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|s| s.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(DataliftError::storage(format!(
                        "head s3://{}/{}: {}",
                        self.bucket, key, e
                    )))
                }
            },
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                DataliftError::storage(format!("list s3://{}/{}: {}", self.bucket, prefix, e))
            })?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|k| k.to_string())),
            );

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// SHA-256 of object contents, recorded in run manifests.
pub fn content_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_checksum() {
        let checksum = content_checksum(b"Hello, World!");
        assert_eq!(
            checksum,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }
}
