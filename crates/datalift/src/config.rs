//! Configuration management
//!
//! Env-var driven configuration with safe defaults. `.env` files are
//! honored via dotenvy at load time.

use serde::{Deserialize, Serialize};
use std::env;

use crate::ratelimit::HourWindow;
use crate::retry::RetryPolicy;
use datalift_common::{DataliftError, Result};

/// Default steady request rate against the source API.
pub const DEFAULT_RPM: u32 = 40;

/// Default per-request timeout for source API calls.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Default extraction worker count.
pub const DEFAULT_EXTRACT_WORKERS: usize = 8;

/// Default load worker count.
pub const DEFAULT_LOAD_WORKERS: usize = 8;

/// Default number of bronze parts grouped into one load batch.
pub const DEFAULT_PARTS_PER_BATCH: usize = 10;

/// Default overlap applied at the watermark boundary to absorb clock skew
/// between upstream update-time filters and actual commit time.
pub const DEFAULT_OVERLAP_MINUTES: i64 = 5;

/// Credentials for the source API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceAuth {
    /// HTTP basic auth (username + password).
    Basic { username: String, password: String },
    /// Token sent in a named request header.
    Header { name: String, value: String },
    None,
}

/// Source API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name as it appears in lake paths (e.g. "evo").
    pub name: String,
    pub base_url: String,
    pub auth: SourceAuth,
    pub request_timeout_secs: u64,
    pub rpm: u32,
    /// Optional local-time window during which throttling is disabled.
    pub unrestricted_window: Option<HourWindow>,
}

impl SourceConfig {
    /// Load from environment:
    ///
    /// - `SOURCE_NAME`, `SOURCE_API_URL` (required)
    /// - `SOURCE_USERNAME`/`SOURCE_PASSWORD` or
    ///   `SOURCE_TOKEN_HEADER`/`SOURCE_API_TOKEN`
    /// - `SOURCE_RPM`, `SOURCE_TIMEOUT_SECS`, `SOURCE_FREE_WINDOW` ("0-5")
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let name = require_env("SOURCE_NAME")?;
        let base_url = require_env("SOURCE_API_URL")?;

        let auth = match (env::var("SOURCE_USERNAME").ok(), env::var("SOURCE_API_TOKEN").ok()) {
            (Some(username), _) => SourceAuth::Basic {
                username,
                password: require_env("SOURCE_PASSWORD")?,
            },
            (None, Some(value)) => SourceAuth::Header {
                name: env::var("SOURCE_TOKEN_HEADER")
                    .unwrap_or_else(|_| "x-api-token".to_string()),
                value,
            },
            (None, None) => SourceAuth::None,
        };

        let unrestricted_window = match env::var("SOURCE_FREE_WINDOW") {
            Ok(raw) => Some(raw.parse()?),
            Err(_) => None,
        };

        Ok(SourceConfig {
            name,
            base_url,
            auth,
            request_timeout_secs: env_parse("SOURCE_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            rpm: env_parse("SOURCE_RPM", DEFAULT_RPM),
            unrestricted_window,
        })
    }

    /// Just the lake name from `SOURCE_NAME`. The load path only needs
    /// this to build bronze prefixes; it never contacts the source API, so
    /// URL and credentials are not required there.
    pub fn name_from_env() -> Result<String> {
        dotenvy::dotenv().ok();
        require_env("SOURCE_NAME")
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(DataliftError::config("source base URL cannot be empty"));
        }
        if self.rpm == 0 {
            return Err(DataliftError::config("source rpm must be > 0"));
        }
        Ok(())
    }
}

/// S3-compatible object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl S3Config {
    pub fn from_env() -> Result<Self> {
        Ok(S3Config {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "datalake".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .map_err(|_| DataliftError::config("S3_ACCESS_KEY not set"))?,
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .map_err(|_| DataliftError::config("S3_SECRET_KEY not set"))?,
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        S3Config {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}

/// Extraction stage tuning.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub workers: usize,
    pub overlap_minutes: i64,
    pub retry: RetryPolicy,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            workers: DEFAULT_EXTRACT_WORKERS,
            overlap_minutes: DEFAULT_OVERLAP_MINUTES,
            retry: RetryPolicy::default(),
        }
    }
}

/// Load stage tuning.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub workers: usize,
    pub parts_per_batch: usize,
    pub retry: RetryPolicy,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            workers: DEFAULT_LOAD_WORKERS,
            parts_per_batch: DEFAULT_PARTS_PER_BATCH,
            retry: RetryPolicy::default(),
        }
    }
}

fn require_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| DataliftError::config(format!("{} not set", name)))
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
