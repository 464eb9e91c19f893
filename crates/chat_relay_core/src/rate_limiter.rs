//! crates/chat_relay_core/src/rate_limiter.rs
//!
//! Per-session fixed-window request counter.
//!
//! The window is fixed, not sliding: a client can land up to twice the limit
//! in a short interval straddling a window boundary.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Deny { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitCounter {
    window_start: Instant,
    count: u32,
}

/// Tracks one counter per session.
#[derive(Debug, Default)]
pub struct RateLimiter {
    counters: DashMap<String, RateLimitCounter>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            counters: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> RateLimitSettings {
        self.settings
    }

    /// Counts one request against the session's window, or refuses it.
    pub fn check_and_consume(&self, session_id: &str) -> RateDecision {
        let now = Instant::now();
        // The entry guard holds the shard lock, so a concurrent sweep cannot
        // delete the counter between the reset check and the increment.
        let mut counter = self
            .counters
            .entry(session_id.to_string())
            .or_insert_with(|| RateLimitCounter {
                window_start: now,
                count: 0,
            });

        if now.saturating_duration_since(counter.window_start) > self.settings.window {
            counter.window_start = now;
            counter.count = 0;
        }

        if counter.count >= self.settings.max_requests {
            let elapsed = now.saturating_duration_since(counter.window_start);
            let remaining = self.settings.window.saturating_sub(elapsed);
            let retry_after_secs =
                (remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)).max(1);
            warn!(session_id, retry_after_secs, "Rate limit exceeded");
            return RateDecision::Deny { retry_after_secs };
        }

        counter.count += 1;
        RateDecision::Allow
    }

    /// Deletes every counter whose window has expired. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.settings.window;
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| now.saturating_duration_since(counter.window_start) <= window);
        let removed = before.saturating_sub(self.counters.len());
        debug!(removed, remaining = self.counters.len(), "Rate limit sweep finished");
        removed
    }

    pub fn forget(&self, session_id: &str) {
        self.counters.remove(session_id);
    }

    pub fn tracked(&self) -> usize {
        self.counters.len()
    }
}
