//! Outbound request rate limiter
//!
//! Each extraction worker owns its own limiter; there is no cross-worker
//! coordination, so effective global throughput is `workers × rpm` and the
//! operator must size that below the upstream's true limit.

use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Minimal pause applied inside the unrestricted window, so a tight loop
/// still yields to the scheduler.
const UNRESTRICTED_DELAY: Duration = Duration::from_millis(10);

/// A local-time hour range `[start, end)` during which throttling is
/// disabled. Supports ranges that wrap midnight (e.g. 22-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn new(start: u32, end: u32) -> Self {
        HourWindow { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

impl std::str::FromStr for HourWindow {
    type Err = datalift_common::DataliftError;

    /// Parses "0-5" style hour ranges.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || datalift_common::DataliftError::config(format!("invalid hour window: {}", s));
        let (start, end) = s.split_once('-').ok_or_else(invalid)?;
        let start: u32 = start.trim().parse().map_err(|_| invalid())?;
        let end: u32 = end.trim().parse().map_err(|_| invalid())?;
        if start > 23 || end > 24 {
            return Err(invalid());
        }
        Ok(HourWindow::new(start, end))
    }
}

/// Throttles outbound requests to a steady requests-per-minute rate.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    unrestricted: Option<HourWindow>,
    last_request: Option<Instant>,
    requests: u64,
}

impl RateLimiter {
    pub fn new(rpm: u32) -> Self {
        RateLimiter {
            min_interval: Duration::from_secs_f64(60.0 / rpm.max(1) as f64),
            unrestricted: None,
            last_request: None,
            requests: 0,
        }
    }

    /// Disable throttling during the given local-time window (off-peak
    /// hours where the upstream tolerates full speed).
    pub fn with_unrestricted_window(mut self, window: Option<HourWindow>) -> Self {
        self.unrestricted = window;
        self
    }

    /// Number of `wait` calls so far, reported in chunk outcomes.
    pub fn request_count(&self) -> u64 {
        self.requests
    }

    /// Suspend the calling task until the next request may be issued.
    pub async fn wait(&mut self) {
        self.requests += 1;

        if let Some(window) = self.unrestricted {
            if window.contains(Local::now().hour()) {
                tokio::time::sleep(UNRESTRICTED_DELAY).await;
                return;
            }
        }

        let now = Instant::now();
        if let Some(last) = self.last_request {
            let elapsed = now.duration_since(last);
            if elapsed < self.min_interval {
                let pause = self.min_interval - elapsed;
                trace!(pause_ms = pause.as_millis() as u64, "Rate limit pause");
                tokio::time::sleep(pause).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hour_window_contains() {
        let w = HourWindow::new(0, 5);
        assert!(w.contains(0));
        assert!(w.contains(4));
        assert!(!w.contains(5));
        assert!(!w.contains(23));
    }

    #[test]
    fn hour_window_wraps_midnight() {
        let w = HourWindow::new(22, 5);
        assert!(w.contains(23));
        assert!(w.contains(2));
        assert!(!w.contains(12));
    }

    #[test]
    fn hour_window_parses() {
        assert_eq!("0-5".parse::<HourWindow>().unwrap(), HourWindow::new(0, 5));
        assert_eq!(
            "22-24".parse::<HourWindow>().unwrap(),
            HourWindow::new(22, 24)
        );
        assert!("5".parse::<HourWindow>().is_err());
        assert!("25-3".parse::<HourWindow>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn n_waits_take_at_least_n_minus_one_intervals() {
        // 60 rpm -> 1s min interval.
        let mut limiter = RateLimiter::new(60);
        let begin = Instant::now();
        for _ in 0..4 {
            limiter.wait().await;
        }
        let elapsed = begin.elapsed();
        assert!(
            elapsed >= Duration::from_secs(3),
            "expected >= 3s, got {:?}",
            elapsed
        );
        assert_eq!(limiter.request_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unrestricted_window_collapses_interval() {
        // A window covering every hour of the day forces the unrestricted
        // path regardless of the local wall clock.
        let mut limiter =
            RateLimiter::new(1).with_unrestricted_window(Some(HourWindow::new(0, 24)));
        let begin = Instant::now();
        for _ in 0..10 {
            limiter.wait().await;
        }
        // 10 waits at 10ms each, nowhere near the 60s throttled interval.
        assert!(begin.elapsed() < Duration::from_secs(1));
    }
}
