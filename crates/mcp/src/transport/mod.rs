//! Transports: stdio, HTTP (+SSE), and WebSocket.

pub mod http;
pub mod stdio;
pub mod ws;

use std::time::{Duration, Instant};

/// Fixed-window per-connection rate limiter.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    started: Instant,
    count: u32,
}

impl RateLimiter {
    /// A limiter allowing `limit` requests per minute.
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            window: Duration::from_secs(60),
            started: Instant::now(),
            count: 0,
        }
    }

    /// Record one request; `false` means the connection is over budget.
    pub fn allow(&mut self) -> bool {
        if self.started.elapsed() >= self.window {
            self.started = Instant::now();
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_caps_within_window() {
        let mut limiter = RateLimiter::per_minute(3);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
