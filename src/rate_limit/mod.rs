// Rate limiting for outbound connector requests
//
// Per-connector sliding window over the trailing 60 seconds. Checking admission
// and recording a request are separate steps: a request is recorded only
// immediately before the HTTP call is issued.
//
// State is in-memory only (resets on restart). A fresh process re-measures
// from an empty window.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Length of the sliding window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests still available in the current window
    pub remaining: u32,
    /// Time until the oldest recorded request leaves the window
    pub reset_in_ms: u64,
}

/// Window usage snapshot for a single connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub requests_used: u32,
    pub requests_per_minute: u32,
    pub remaining: u32,
    pub reset_in_ms: u64,
}

/// Request instants for one connector, oldest first.
#[derive(Default)]
struct RequestWindow {
    requests: VecDeque<Instant>,
}

impl RequestWindow {
    /// Drop entries that have aged out of the window as of `now`.
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.requests.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn used(&self) -> u32 {
        self.requests.len().min(u32::MAX as usize) as u32
    }

    fn reset_in_ms(&self, now: Instant) -> u64 {
        match self.requests.front() {
            Some(oldest) => {
                let age = now.saturating_duration_since(*oldest);
                WINDOW.saturating_sub(age).as_millis() as u64
            }
            None => 0,
        }
    }
}

/// Per-connector sliding-window rate limiter.
///
/// Windows are created lazily on first use and keyed by connector id.
pub struct RateLimiter {
    windows: DashMap<String, RequestWindow>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Check whether `connector_id` may issue another request under `budget_per_minute`.
    ///
    /// Does not record anything; call [`RateLimiter::record_request`] right before
    /// the request is actually sent.
    pub fn check_rate_limit(&self, connector_id: &str, budget_per_minute: u32) -> RateLimitDecision {
        self.check_rate_limit_at(connector_id, budget_per_minute, Instant::now())
    }

    pub fn check_rate_limit_at(
        &self,
        connector_id: &str,
        budget_per_minute: u32,
        now: Instant,
    ) -> RateLimitDecision {
        let mut window = self.windows.entry(connector_id.to_string()).or_default();
        window.prune(now);

        let used = window.used();
        RateLimitDecision {
            allowed: used < budget_per_minute,
            remaining: budget_per_minute.saturating_sub(used),
            reset_in_ms: window.reset_in_ms(now),
        }
    }

    /// Record that a request for `connector_id` is being issued now.
    pub fn record_request(&self, connector_id: &str) {
        self.record_request_at(connector_id, Instant::now());
    }

    pub fn record_request_at(&self, connector_id: &str, now: Instant) {
        let mut window = self.windows.entry(connector_id.to_string()).or_default();
        window.prune(now);
        window.requests.push_back(now);
    }

    /// Current usage for `connector_id` without recording anything.
    pub fn status(&self, connector_id: &str, budget_per_minute: u32) -> RateLimitStatus {
        self.status_at(connector_id, budget_per_minute, Instant::now())
    }

    pub fn status_at(&self, connector_id: &str, budget_per_minute: u32, now: Instant) -> RateLimitStatus {
        let (used, reset_in_ms) = match self.windows.get_mut(connector_id) {
            Some(mut window) => {
                window.prune(now);
                (window.used(), window.reset_in_ms(now))
            }
            None => (0, 0),
        };
        RateLimitStatus {
            requests_used: used,
            requests_per_minute: budget_per_minute,
            remaining: budget_per_minute.saturating_sub(used),
            reset_in_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admit(limiter: &RateLimiter, id: &str, budget: u32, now: Instant) -> bool {
        let decision = limiter.check_rate_limit_at(id, budget, now);
        if decision.allowed {
            limiter.record_request_at(id, now);
        }
        decision.allowed
    }

    #[test]
    fn test_allows_within_limit() {
        let limiter = RateLimiter::new();
        let decision = limiter.check_rate_limit("conn-1", 5);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);
        assert_eq!(decision.reset_in_ms, 0);
    }

    #[test]
    fn test_sixth_request_in_window_is_rejected() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        for i in 0..5 {
            assert!(admit(&limiter, "conn-1", 5, start + Duration::from_secs(i)));
        }

        let decision = limiter.check_rate_limit_at("conn-1", 5, start + Duration::from_secs(10));
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        // Oldest request (t=0) leaves the window at t=60
        assert_eq!(decision.reset_in_ms, 50_000);
    }

    #[test]
    fn test_admission_resumes_after_oldest_ages_out() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        for i in 0..5 {
            assert!(admit(&limiter, "conn-1", 5, start + Duration::from_secs(i)));
        }
        assert!(!limiter.check_rate_limit_at("conn-1", 5, start + Duration::from_secs(59)).allowed);

        // t=60: the request recorded at t=0 has aged out
        let decision = limiter.check_rate_limit_at("conn-1", 5, start + Duration::from_secs(60));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn test_check_does_not_record() {
        let limiter = RateLimiter::new();
        for _ in 0..10 {
            assert!(limiter.check_rate_limit("conn-1", 1).allowed);
        }
        assert_eq!(limiter.status("conn-1", 1).requests_used, 0);
    }

    #[test]
    fn test_separate_windows_per_connector() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        assert!(admit(&limiter, "conn-1", 1, now));
        assert!(!admit(&limiter, "conn-1", 1, now));
        // conn-2 is unaffected
        assert!(admit(&limiter, "conn-2", 1, now));
    }

    #[test]
    fn test_status_reports_usage() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        limiter.record_request_at("conn-1", start);
        limiter.record_request_at("conn-1", start + Duration::from_secs(30));

        let status = limiter.status_at("conn-1", 10, start + Duration::from_secs(40));
        assert_eq!(status.requests_used, 2);
        assert_eq!(status.requests_per_minute, 10);
        assert_eq!(status.remaining, 8);
        assert_eq!(status.reset_in_ms, 20_000);

        let unknown = limiter.status("never-seen", 10);
        assert_eq!(unknown.requests_used, 0);
        assert_eq!(unknown.remaining, 10);
    }

    #[test]
    fn test_zero_budget_admits_nothing() {
        let limiter = RateLimiter::new();
        assert!(!limiter.check_rate_limit("conn-1", 0).allowed);
    }
}
