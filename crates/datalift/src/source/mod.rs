//! Source API access
//!
//! A thin JSON HTTP client plus the two pagination protocols the pipeline
//! speaks. Transport failures and throttling responses are classified here
//! so the retry layer can tell transient from fatal.

use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::{SourceAuth, SourceConfig};
use datalift_common::{DataliftError, Result};

pub mod pagination;

pub use pagination::{CursorPager, OffsetPager};

/// Longest error-body excerpt carried into error values and logs.
const MAX_BODY_EXCERPT: usize = 512;

/// JSON-over-HTTP client for one source API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: SourceAuth,
}

impl ApiClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DataliftError::config(format!("http client: {}", e)))?;

        Ok(ApiClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config.auth.clone(),
        })
    }

    /// GET a JSON document. 401/403 are fatal auth errors; 429 carries the
    /// server's `Retry-After` when present; timeouts and connection errors
    /// come back as transient network errors.
    pub async fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.http.get(&url).query(params);
        request = match &self.auth {
            SourceAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            },
            SourceAuth::Header { name, value } => request.header(name, value),
            SourceAuth::None => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DataliftError::Network(format!("timeout fetching {}: {}", url, e))
            } else {
                DataliftError::Network(format!("request to {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DataliftError::Auth {
                status: status.as_u16(),
                url,
            });
        }
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(DataliftError::HttpStatus {
                status: status.as_u16(),
                url,
                body: truncate(&body, MAX_BODY_EXCERPT),
                retry_after_secs,
            });
        }

        debug!(url = %url, "Fetched page");
        response
            .json()
            .await
            .map_err(|e| DataliftError::Network(format!("decoding body from {}: {}", url, e)))
    }
}

/// Pull the record array out of a page payload. Accepted shapes are a bare
/// JSON array or an object whose `data` key holds one.
pub fn records_from_payload(payload: &Value) -> Result<Vec<Value>> {
    match payload {
        Value::Array(records) => Ok(records.clone()),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(records)) => Ok(records.clone()),
            Some(Value::Null) => Ok(Vec::new()),
            _ => Err(DataliftError::ProtocolAmbiguity {
                payload_keys: map.keys().cloned().collect(),
            }),
        },
        _ => Err(DataliftError::ProtocolAmbiguity {
            payload_keys: Vec::new(),
        }),
    }
}

/// Upstream soft-delete marker. Sources that tombstone records instead of
/// removing them flag this with a boolean field.
pub fn is_deleted(record: &Value) -> bool {
    ["is_deleted", "deleted"]
        .iter()
        .any(|field| record.get(field).and_then(Value::as_bool).unwrap_or(false))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
