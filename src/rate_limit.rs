//! Fixed-window request quota per client address.
//!
//! Counters reset on a clock boundary per client rather than tracking a rolling
//! log, so a client can land up to twice the quota across a window edge.

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, Duration, Utc};

const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
struct RateWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

impl Admission {
    pub fn reset_after_seconds(&self) -> u64 {
        (self.reset_at - self.now).num_seconds().max(1) as u64
    }

    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let values = [
            ("ratelimit-limit", self.limit.to_string()),
            ("ratelimit-remaining", self.remaining.to_string()),
            ("ratelimit-reset", self.reset_after_seconds().to_string()),
        ];

        for (name, value) in values {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: HashMap<String, RateWindow>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: HashMap::new(),
            limit,
            window,
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    pub fn admit(&mut self, client_key: &str) -> Admission {
        self.admit_at(client_key, Utc::now())
    }

    pub fn admit_at(&mut self, client_key: &str, now: DateTime<Utc>) -> Admission {
        if self.windows.len() >= PRUNE_THRESHOLD {
            self.windows.retain(|_, window| window.reset_at > now);
        }

        let span = self.window;
        let window = self
            .windows
            .entry(client_key.to_string())
            .or_insert_with(|| RateWindow {
                count: 0,
                reset_at: now + span,
            });

        if window.reset_at <= now {
            window.count = 0;
            window.reset_at = now + span;
        }

        let allowed = window.count < self.limit;
        if allowed {
            window.count += 1;
        }

        Admission {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(window.count),
            reset_at: window.reset_at,
            now,
        }
    }
}
