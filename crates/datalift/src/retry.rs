//! Transient-failure retry
//!
//! Exponential backoff applied around source API calls, bronze uploads and
//! whole load batches. Only errors classified transient are retried; fatal
//! errors surface immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use datalift_common::{DataliftError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
        }
    }

    /// Delay before re-running attempt `attempt + 1` (0-based): base * 2^attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Run `operation` until it succeeds, a fatal error occurs, or the attempt
/// budget is exhausted. A server-provided `Retry-After` stretches the delay
/// but never shortens it.
pub async fn retry_transient<T, F, Fut>(
    what: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_retries => {
                let mut delay = policy.backoff_delay(attempt);
                if let Some(secs) = e.retry_after_secs() {
                    delay = delay.max(Duration::from_secs(secs));
                }
                warn!(
                    what = %what,
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_secs = delay.as_secs_f64(),
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transient() -> DataliftError {
        DataliftError::Network("connection reset".to_string())
    }

    fn fatal() -> DataliftError {
        DataliftError::config("bad entity")
    }

    async fn run_failing(failures: u32, policy: &RetryPolicy) -> (Result<u32>, u32) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retry_transient("test", policy, move || {
            let calls = Arc::clone(&counter);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(transient())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_when_failures_below_budget() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let (result, calls) = run_failing(2, &policy).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_when_budget_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let (result, calls) = run_failing(3, &policy).await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<()> = retry_transient("test", &policy, move || {
            let calls = Arc::clone(&counter);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(fatal())
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_double_between_attempts() {
        let policy = RetryPolicy::new(4, Duration::from_secs(10));
        let start = tokio::time::Instant::now();
        let (result, _) = run_failing(3, &policy).await;
        assert_eq!(result.unwrap(), 3);
        // 10 + 20 + 40 seconds of backoff
        assert!(start.elapsed() >= Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_stretches_delay() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let start = tokio::time::Instant::now();
        let result = retry_transient("test", &policy, move || {
            let calls = Arc::clone(&counter);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DataliftError::HttpStatus {
                        status: 429,
                        url: "http://api/x".to_string(),
                        body: String::new(),
                        retry_after_secs: Some(30),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[test]
    fn backoff_progression() {
        let policy = RetryPolicy::new(5, Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(20));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(40));
    }
}
