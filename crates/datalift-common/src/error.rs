//! Error types for Datalift
//!
//! Every adapter (HTTP client, object storage, relational sink) returns a
//! typed [`DataliftError`], and [`DataliftError::kind`] is the only place
//! that decides whether an error is worth retrying. The retry wrapper
//! switches on the kind, never on message content.

use thiserror::Error;

/// Result type alias for Datalift operations
pub type Result<T> = std::result::Result<T, DataliftError>;

/// Retry classification for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient infrastructure failure; retrying with backoff may succeed
    /// (connection reset, failover, rate-limit 429, 5xx, timeouts).
    Transient,
    /// Retrying cannot succeed (auth failure, bad data, contract violation).
    Fatal,
}

/// Main error type for Datalift
#[derive(Error, Debug)]
pub enum DataliftError {
    /// Non-success HTTP status from the source API.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        status: u16,
        url: String,
        /// Truncated response body, kept for diagnostics.
        body: String,
        /// Server-provided Retry-After, honored by the retry layer.
        retry_after_secs: Option<u64>,
    },

    /// Request-level network failure (timeout, reset, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// Authorization rejected by the upstream (401/403). Never retried.
    #[error("authorization failed (HTTP {status}) for {url}")]
    Auth { status: u16, url: String },

    /// Cursor pagination returned neither a next cursor nor an end-of-stream
    /// marker. Upstream contract violation; retrying would loop forever.
    #[error("ambiguous pagination state: no cursor and no end-of-stream marker (payload keys: {payload_keys:?})")]
    ProtocolAmbiguity { payload_keys: Vec<String> },

    /// Object storage transport failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Requested object does not exist in the lake.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DataliftError {
    /// Classify this error for the retry wrapper.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DataliftError::HttpStatus { status, .. } => {
                if *status == 429 || (500..=599).contains(status) {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Fatal
                }
            },
            DataliftError::Network(_) => ErrorKind::Transient,
            DataliftError::Storage(_) => ErrorKind::Transient,
            DataliftError::Database(e) => {
                if sqlx_error_is_transient(e) {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Fatal
                }
            },
            DataliftError::Auth { .. }
            | DataliftError::ProtocolAmbiguity { .. }
            | DataliftError::ObjectNotFound(_)
            | DataliftError::Serialization(_)
            | DataliftError::Io(_)
            | DataliftError::Config(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            DataliftError::HttpStatus {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

/// SQLSTATE classes that indicate a failover or connection-level problem
/// rather than a bad statement:
///
/// - `08xxx` connection exceptions
/// - `25006` read-only SQL transaction (replica promoted/demoted)
/// - `57P01` admin shutdown, `57P02` crash shutdown, `57P03` cannot connect now
fn sqlx_error_is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => {
                code.starts_with("08")
                    || code == "25006"
                    || code == "57P01"
                    || code == "57P02"
                    || code == "57P03"
            },
            None => false,
        },
        _ => false,
    }
}
