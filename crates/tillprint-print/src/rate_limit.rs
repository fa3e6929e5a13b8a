// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sliding-window rate limiter for job submissions.
//
// Each identity (the client's IP address) may submit at most `max_per_window`
// jobs in any trailing 60 seconds. Rejected attempts are not recorded, so a
// client that keeps retrying is admitted as soon as its oldest accepted
// submission leaves the window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Width of the sliding window.
pub const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    max_per_window: usize,
    entries: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_per_window: usize) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a submission attempt by `identity` and report whether it may
    /// proceed.
    pub fn allow(&self, identity: &str) -> bool {
        self.allow_at(identity, Instant::now())
    }

    pub(crate) fn allow_at(&self, identity: &str, now: Instant) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            warn!("Rate limiter state poisoned, admitting request");
            return true;
        };

        let stamps = entries.entry(identity.to_string()).or_default();
        stamps.retain(|t| now.saturating_duration_since(*t) < WINDOW);

        if stamps.len() >= self.max_per_window {
            debug!(identity, count = stamps.len(), "Rate limit reached");
            return false;
        }
        stamps.push(now);
        true
    }

    /// Drop identities with no submission inside the window.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    pub(crate) fn evict_idle_at(&self, now: Instant) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, stamps| {
            stamps.retain(|t| now.saturating_duration_since(*t) < WINDOW);
            !stamps.is_empty()
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "Evicted idle rate-limit entries");
        }
        evicted
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(3);
        let t0 = Instant::now();
        for i in 0..3 {
            assert!(limiter.allow_at("10.0.0.1", t0 + Duration::from_secs(i)));
        }
        assert!(!limiter.allow_at("10.0.0.1", t0 + Duration::from_secs(5)));
        assert!(limiter.allow_at("10.0.0.2", t0 + Duration::from_secs(5)));
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(2);
        let t0 = Instant::now();
        assert!(limiter.allow_at("a", t0));
        assert!(limiter.allow_at("a", t0 + Duration::from_secs(30)));
        assert!(!limiter.allow_at("a", t0 + Duration::from_secs(59)));
        // First stamp is now 60 s old and falls out.
        assert!(limiter.allow_at("a", t0 + Duration::from_secs(60)));
        assert!(!limiter.allow_at("a", t0 + Duration::from_secs(61)));
    }

    #[test]
    fn denied_attempts_are_not_recorded() {
        let limiter = RateLimiter::new(1);
        let t0 = Instant::now();
        assert!(limiter.allow_at("a", t0));
        for s in 1..50 {
            assert!(!limiter.allow_at("a", t0 + Duration::from_secs(s)));
        }
        assert!(limiter.allow_at("a", t0 + WINDOW));
    }

    #[test]
    fn idle_identities_are_evicted() {
        let limiter = RateLimiter::new(5);
        let t0 = Instant::now();
        limiter.allow_at("old", t0);
        limiter.allow_at("new", t0 + Duration::from_secs(50));
        assert_eq!(limiter.tracked(), 2);
        assert_eq!(limiter.evict_idle_at(t0 + Duration::from_secs(70)), 1);
        assert_eq!(limiter.tracked(), 1);
    }
}
