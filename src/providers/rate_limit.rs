//! Per-provider sliding-window request limiter.
//!
//! A provider that is over its window budget is skipped for the current
//! call rather than retried inline.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;

/// Request budget for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window_secs: u64,
}

impl RateLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window_secs: 60,
        }
    }
}

/// Sliding-window limiter keyed by provider name.
///
/// `try_acquire` checks and records in one critical section, so concurrent
/// runs can never jointly exceed a provider's budget.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    default_limit: RateLimit,
    overrides: HashMap<String, RateLimit>,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(default_limit: RateLimit) -> Self {
        Self {
            default_limit,
            overrides: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_limit(mut self, provider: impl Into<String>, limit: RateLimit) -> Self {
        self.overrides.insert(provider.into(), limit);
        self
    }

    pub fn limit_for(&self, provider: &str) -> RateLimit {
        self.overrides
            .get(provider)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Records a request for `provider` if it is within budget.
    pub fn try_acquire(&self, provider: &str) -> bool {
        self.try_acquire_at(provider, Instant::now())
    }

    fn try_acquire_at(&self, provider: &str, now: Instant) -> bool {
        let limit = self.limit_for(provider);
        let window = limit.window();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let timestamps = windows.entry(provider.to_string()).or_default();

        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= limit.max_requests {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Requests left in the current window.
    pub fn remaining(&self, provider: &str) -> usize {
        let limit = self.limit_for(provider);
        let now = Instant::now();
        let windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let used = windows.get(provider).map_or(0, |timestamps| {
            timestamps
                .iter()
                .filter(|t| now.duration_since(**t) < limit.window())
                .count()
        });
        limit.max_requests.saturating_sub(used)
    }
}
