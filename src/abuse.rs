use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// Counter key for one kind of failure from one origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FailureKey {
    pub origin: String,
    pub reason: String,
}

#[derive(Default)]
struct AbuseState {
    blocked: HashSet<String>,
    failures: HashMap<FailureKey, u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureCount {
    pub origin: String,
    pub reason: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityStats {
    pub blocked_origins: Vec<String>,
    pub blocked_count: usize,
    pub suspicious_activity: Vec<FailureCount>,
    pub total_suspicious_events: u64,
}

/// Tracks failed authentication attempts per origin and blocks origins
/// whose total failures reach the threshold.
pub struct AbuseGuard {
    state: Mutex<AbuseState>,
    threshold: u32,
}

impl AbuseGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            state: Mutex::new(AbuseState::default()),
            threshold,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_blocked(&self, origin: &str) -> bool {
        match self.state.lock() {
            Ok(state) => state.blocked.contains(origin),
            Err(_) => {
                tracing::warn!(origin = %origin, "Abuse guard lock poisoned, treating origin as blocked");
                true
            }
        }
    }

    /// Count a failure; returns `true` if the origin is blocked afterwards.
    pub fn record_failure(&self, origin: &str, reason: &str) -> bool {
        let Ok(mut state) = self.state.lock() else {
            tracing::warn!(origin = %origin, reason = %reason, "Abuse guard lock poisoned, failure not recorded");
            return false;
        };

        *state
            .failures
            .entry(FailureKey {
                origin: origin.to_string(),
                reason: reason.to_string(),
            })
            .or_insert(0) += 1;

        let total: u32 = state
            .failures
            .iter()
            .filter(|(key, _)| key.origin == origin)
            .map(|(_, count)| *count)
            .sum();

        if total >= self.threshold && state.blocked.insert(origin.to_string()) {
            tracing::warn!(
                origin = %origin,
                failures = total,
                threshold = self.threshold,
                "Blocked origin due to suspicious activity"
            );
        }

        state.blocked.contains(origin)
    }

    /// Lift a block and forget every failure counted for the origin.
    pub fn unblock(&self, origin: &str) -> bool {
        let Ok(mut state) = self.state.lock() else {
            tracing::warn!(origin = %origin, "Abuse guard lock poisoned, unblock skipped");
            return false;
        };

        let was_blocked = state.blocked.remove(origin);
        state.failures.retain(|key, _| key.origin != origin);
        tracing::info!(origin = %origin, was_blocked, "Unblocked origin");
        was_blocked
    }

    pub fn failure_count(&self, origin: &str) -> u32 {
        self.state
            .lock()
            .map(|state| {
                state
                    .failures
                    .iter()
                    .filter(|(key, _)| key.origin == origin)
                    .map(|(_, count)| *count)
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn stats(&self) -> SecurityStats {
        let Ok(state) = self.state.lock() else {
            return SecurityStats {
                blocked_origins: Vec::new(),
                blocked_count: 0,
                suspicious_activity: Vec::new(),
                total_suspicious_events: 0,
            };
        };

        let mut blocked_origins: Vec<String> = state.blocked.iter().cloned().collect();
        blocked_origins.sort();

        let ordered: BTreeMap<&FailureKey, u32> =
            state.failures.iter().map(|(k, v)| (k, *v)).collect();
        let suspicious_activity: Vec<FailureCount> = ordered
            .into_iter()
            .map(|(key, count)| FailureCount {
                origin: key.origin.clone(),
                reason: key.reason.clone(),
                count,
            })
            .collect();

        SecurityStats {
            blocked_count: blocked_origins.len(),
            blocked_origins,
            total_suspicious_events: suspicious_activity.iter().map(|f| f.count as u64).sum(),
            suspicious_activity,
        }
    }
}
