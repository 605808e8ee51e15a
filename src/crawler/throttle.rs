//! Minimum spacing between consecutive upstream fetches

use std::time::{Duration, Instant};

/// Tracks the last request time and enforces a minimum interval
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request_time: Option<Instant>,
    request_count: u64,
}

impl RateLimiter {
    /// Creates a limiter allowing one request per `min_interval`
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request_time: None,
            request_count: 0,
        }
    }

    /// Builds a limiter from a (validated, non-negative) delay in seconds
    pub fn from_secs_f64(delay_seconds: f64) -> Self {
        Self::new(Duration::from_secs_f64(delay_seconds.max(0.0)))
    }

    /// Checks if a request can be made at `now`
    pub fn can_request(&self, now: Instant) -> bool {
        self.time_until_next_request(now).is_none()
    }

    /// Calculates the time until the next request can be made
    ///
    /// Returns None if a request can be made now, or the duration to wait otherwise.
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        let last = self.last_request_time?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.min_interval {
            return Some(self.min_interval - elapsed);
        }
        None
    }

    /// Records that a request was made at `now`
    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_request_time = Some(now);
    }

    /// Number of requests recorded so far
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
