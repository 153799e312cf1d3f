//! Pagination protocols
//!
//! Two ways of walking a collection endpoint:
//!
//! - [`OffsetPager`]: skip/take paging. A page shorter than `take` ends the
//!   walk. The offset only advances after a page succeeds, so retries re-read
//!   the same page instead of skipping records.
//! - [`CursorPager`]: opaque server-issued cursors. The walk ends on an
//!   explicit end-of-stream flag or an explicit null next-cursor. A payload
//!   that carries neither is a protocol violation and fails the chunk.

use serde_json::Value;

use super::{records_from_payload, ApiClient};
use crate::ratelimit::RateLimiter;
use crate::retry::{retry_transient, RetryPolicy};
use datalift_common::{DataliftError, Result};

/// skip/take walker over one endpoint with a fixed parameter set.
pub struct OffsetPager {
    path: String,
    take: usize,
    params: Vec<(String, String)>,
    skip: usize,
    done: bool,
    pages: u64,
}

impl OffsetPager {
    pub fn new(path: impl Into<String>, take: usize, params: Vec<(String, String)>) -> Self {
        OffsetPager {
            path: path.into(),
            take,
            params,
            skip: 0,
            done: false,
            pages: 0,
        }
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Fetch the next page, or `None` once the walk is complete.
    pub async fn next_page(
        &mut self,
        client: &ApiClient,
        limiter: &mut RateLimiter,
        retry: &RetryPolicy,
    ) -> Result<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }

        limiter.wait().await;

        let mut params = self.params.clone();
        params.push(("skip".to_string(), self.skip.to_string()));
        params.push(("take".to_string(), self.take.to_string()));

        let path = self.path.clone();
        let payload =
            retry_transient(&path, retry, || client.get_json(&path, &params)).await?;
        let records = records_from_payload(&payload)?;

        self.pages += 1;
        if records.len() < self.take {
            self.done = true;
        } else {
            self.skip += self.take;
        }

        if records.is_empty() {
            Ok(None)
        } else {
            Ok(Some(records))
        }
    }
}

/// Where a payload's next-cursor may live, in lookup order.
const CURSOR_POINTERS: [&str; 4] = [
    "/after_cursor",
    "/next_cursor",
    "/additional_data/next_cursor",
    "/meta/after_cursor",
];

/// Cursor walker over one endpoint. May be seeded from a persisted cursor
/// to resume where the previous run stopped.
pub struct CursorPager {
    path: String,
    page_size: usize,
    params: Vec<(String, String)>,
    cursor: Option<String>,
    done: bool,
    pages: u64,
    last_cursor: Option<String>,
}

impl CursorPager {
    pub fn new(path: impl Into<String>, page_size: usize, params: Vec<(String, String)>) -> Self {
        CursorPager {
            path: path.into(),
            page_size,
            params,
            cursor: None,
            done: false,
            pages: 0,
            last_cursor: None,
        }
    }

    /// Resume from a cursor persisted by an earlier run.
    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.last_cursor = cursor.clone();
        self.cursor = cursor;
        self
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Latest cursor issued by the server, persisted as the new watermark
    /// after a clean run.
    pub fn last_cursor(&self) -> Option<&str> {
        self.last_cursor.as_deref()
    }

    pub async fn next_page(
        &mut self,
        client: &ApiClient,
        limiter: &mut RateLimiter,
        retry: &RetryPolicy,
    ) -> Result<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }

        limiter.wait().await;

        let mut params = self.params.clone();
        params.push(("limit".to_string(), self.page_size.to_string()));
        if let Some(cursor) = &self.cursor {
            params.push(("cursor".to_string(), cursor.clone()));
        }

        let path = self.path.clone();
        let payload =
            retry_transient(&path, retry, || client.get_json(&path, &params)).await?;
        let records = records_from_payload(&payload)?;
        self.pages += 1;

        let end_of_stream = payload.get("end_of_stream").and_then(Value::as_bool);
        match find_cursor(&payload) {
            // Cursor key present with a value: remember it and keep going
            // unless the server also says the stream is drained.
            Some(Some(next)) => {
                self.last_cursor = Some(next.clone());
                self.cursor = Some(next);
                if end_of_stream == Some(true) {
                    self.done = true;
                }
            },
            // Explicit null next-cursor is a clean end of the walk.
            Some(None) => {
                self.done = true;
            },
            None => match end_of_stream {
                Some(true) => self.done = true,
                // No way to continue and no signal to stop.
                _ => {
                    return Err(DataliftError::ProtocolAmbiguity {
                        payload_keys: payload
                            .as_object()
                            .map(|m| m.keys().cloned().collect())
                            .unwrap_or_default(),
                    });
                },
            },
        }

        Ok(Some(records))
    }
}

/// Outer `None`: no cursor key at all. `Some(None)`: key present but null.
fn find_cursor(payload: &Value) -> Option<Option<String>> {
    CURSOR_POINTERS
        .iter()
        .find_map(|pointer| payload.pointer(pointer))
        .map(|v| v.as_str().map(|s| s.to_string()))
}
