//! Fixed-window request counter keyed by client identity.
//!
//! Bursts straddling a window boundary can briefly exceed the ceiling; that
//! imprecision is accepted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Records kept before expired ones are swept.
const PRUNE_THRESHOLD: usize = 10_000;

/// Time source for the limiter.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitRecord {
    window_start: Instant,
    count: u32,
}

/// Outcome of one `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl RateLimiter {
    /// `max_requests == 0` disables limiting.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window,
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }

    /// Count one request from `client` and decide whether it may proceed.
    pub fn check(&self, client: &str) -> RateDecision {
        if !self.is_enabled() {
            return RateDecision::Allowed {
                remaining: u32::MAX,
            };
        }

        let now = self.clock.now();
        let mut records = self.lock();

        if records.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            records.retain(|_, r| now.duration_since(r.window_start) < window);
        }

        match records.get_mut(client) {
            Some(record) if now.duration_since(record.window_start) < self.window => {
                if record.count >= self.max_requests {
                    let elapsed = now.duration_since(record.window_start);
                    RateDecision::Limited {
                        retry_after: self.window.saturating_sub(elapsed),
                    }
                } else {
                    record.count += 1;
                    RateDecision::Allowed {
                        remaining: self.max_requests - record.count,
                    }
                }
            }
            _ => {
                records.insert(
                    client.to_string(),
                    RateLimitRecord {
                        window_start: now,
                        count: 1,
                    },
                );
                RateDecision::Allowed {
                    remaining: self.max_requests - 1,
                }
            }
        }
    }

    /// Requests counted for `client` in its current window.
    #[cfg(test)]
    pub(crate) fn count_for(&self, client: &str) -> u32 {
        let now = self.clock.now();
        self.lock()
            .get(client)
            .filter(|r| now.duration_since(r.window_start) < self.window)
            .map_or(0, |r| r.count)
    }

    #[cfg(test)]
    pub(crate) fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateLimitRecord>> {
        // The map holds plain counters, so a panic elsewhere cannot leave it
        // inconsistent.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}
