use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{GateError, Result};

/// Outcome of a sliding-window check, reported on both allow and deny.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: u32,
    /// Requests counted in the window after this decision.
    pub current: u32,
    pub remaining: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    #[serde(with = "humantime_serde", default)]
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Whole seconds until a retry can succeed, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after
            .map(|d| {
                let secs = d.as_secs();
                if d.subsec_nanos() > 0 {
                    secs + 1
                } else {
                    secs
                }
            })
            .unwrap_or(0)
    }
}

/// Admitted request instants for one key, oldest first.
struct RequestWindow {
    hits: VecDeque<Instant>,
    window: Duration,
}

impl RequestWindow {
    fn prune(&mut self, now: Instant) {
        // Before `now - window` is representable every stored hit is inside the window.
        if let Some(window_start) = now.checked_sub(self.window) {
            while self.hits.front().is_some_and(|&hit| hit <= window_start) {
                self.hits.pop_front();
            }
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.hits
            .back()
            .map_or(true, |&newest| newest + self.window <= now)
    }
}

struct LimiterState {
    windows: HashMap<String, RequestWindow>,
    last_purge: Instant,
}

/// Sliding-window request counter keyed by credential.
///
/// Each key keeps at most `limit` instants: a hit is only stored when it is
/// admitted, and admission requires fewer than `limit` hits in the window.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    purge_interval: Duration,
}

impl RateLimiter {
    pub fn new(purge_interval: Duration) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                windows: HashMap::new(),
                last_purge: Instant::now(),
            }),
            purge_interval,
        }
    }

    /// Check and, if allowed, count a request for `key` at the current instant.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> Result<RateLimitInfo> {
        self.check_at(key, limit, window, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> Result<RateLimitInfo> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GateError::Internal("Failed to acquire rate limiter lock".to_string()))?;

        if now.saturating_duration_since(state.last_purge) >= self.purge_interval {
            let before = state.windows.len();
            state.windows.retain(|_, w| !w.is_expired(now));
            state.last_purge = now;
            tracing::debug!(purged = before - state.windows.len(), "Purged idle rate limit windows");
        }

        if limit == 0 {
            return Ok(RateLimitInfo {
                allowed: false,
                limit,
                current: 0,
                remaining: 0,
                window,
                retry_after: Some(window),
            });
        }

        let entry = state
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RequestWindow {
                hits: VecDeque::with_capacity(limit.min(1024) as usize),
                window,
            });
        entry.window = window;
        entry.prune(now);

        let current = entry.hits.len() as u32;
        if current >= limit {
            let retry_after = entry
                .hits
                .front()
                .map(|&oldest| (oldest + window).saturating_duration_since(now));

            return Ok(RateLimitInfo {
                allowed: false,
                limit,
                current,
                remaining: 0,
                window,
                retry_after,
            });
        }

        entry.hits.push_back(now);

        Ok(RateLimitInfo {
            allowed: true,
            limit,
            current: current + 1,
            remaining: limit - current - 1,
            window,
            retry_after: None,
        })
    }

    /// Forget the recorded window for a key.
    pub fn reset(&self, key: &str) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GateError::Internal("Failed to acquire rate limiter lock".to_string()))?;
        state.windows.remove(key);
        Ok(())
    }

    /// Number of keys currently holding a window.
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().map(|s| s.windows.len()).unwrap_or(0)
    }

    #[cfg(test)]
    fn window_len(&self, key: &str) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.windows.get(key).map(|w| w.hits.len()))
            .unwrap_or(0)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_fourth_rapid_request_is_denied() {
        let limiter = RateLimiter::default();

        for expected_remaining in [2, 1, 0] {
            let info = limiter.check("key-a", 3, MINUTE).unwrap();
            assert!(info.allowed);
            assert_eq!(info.remaining, expected_remaining);
        }

        let denied = limiter.check("key-a", 3, MINUTE).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.current, 3);
        assert!(denied.retry_after.unwrap() > Duration::ZERO);
        assert!(denied.retry_after_secs() > 0);
    }

    #[test]
    fn test_zero_limit_always_denies() {
        let limiter = RateLimiter::default();
        let info = limiter.check("key-z", 0, MINUTE).unwrap();
        assert!(!info.allowed);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::default();
        assert!(limiter.check("a", 1, MINUTE).unwrap().allowed);
        assert!(!limiter.check("a", 1, MINUTE).unwrap().allowed);
        assert!(limiter.check("b", 1, MINUTE).unwrap().allowed);
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::default();
        let start = Instant::now();

        assert!(limiter.check_at("k", 2, MINUTE, start).unwrap().allowed);
        assert!(limiter.check_at("k", 2, MINUTE, start + Duration::from_secs(30)).unwrap().allowed);

        let denied = limiter.check_at("k", 2, MINUTE, start + Duration::from_secs(45)).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_secs(15)));

        // The first hit leaves the window exactly at start + 60s.
        let later = limiter.check_at("k", 2, MINUTE, start + Duration::from_secs(60)).unwrap();
        assert!(later.allowed);
        assert_eq!(later.current, 2);
    }

    #[test]
    fn test_idle_windows_are_purged() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        let start = Instant::now();

        limiter.check_at("idle", 5, MINUTE, start).unwrap();
        assert_eq!(limiter.tracked_keys(), 1);

        limiter
            .check_at("fresh", 5, MINUTE, start + Duration::from_secs(120))
            .unwrap();
        assert_eq!(limiter.tracked_keys(), 1);
        assert_eq!(limiter.window_len("idle"), 0);
    }

    #[test]
    fn test_reset_clears_window() {
        let limiter = RateLimiter::default();
        assert!(limiter.check("k", 1, MINUTE).unwrap().allowed);
        limiter.reset("k").unwrap();
        assert!(limiter.check("k", 1, MINUTE).unwrap().allowed);
    }

    proptest! {
        #[test]
        fn prop_admitted_requests_never_exceed_limit_in_any_window(
            limit in 1u32..8,
            window_ms in 50u64..2_000,
            gaps in proptest::collection::vec(0u64..400, 1..200),
        ) {
            let limiter = RateLimiter::new(Duration::from_secs(3600));
            let window = Duration::from_millis(window_ms);
            let start = Instant::now();

            let mut offset = 0u64;
            let mut admitted = Vec::new();
            for gap in gaps {
                offset += gap;
                let info = limiter
                    .check_at("prop", limit, window, start + Duration::from_millis(offset))
                    .unwrap();
                if info.allowed {
                    admitted.push(offset);
                }
                prop_assert!(limiter.window_len("prop") <= limit as usize);
            }

            for &end in &admitted {
                let in_window = admitted
                    .iter()
                    .filter(|&&t| t <= end && t + window_ms > end)
                    .count();
                prop_assert!(in_window <= limit as usize);
            }
        }
    }
}
