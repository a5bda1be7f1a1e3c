//! Per-message-id admission control.
//!
//! Each id may be submitted at most `limit` times inside a window. The window
//! is measured from the most recent admitted submission: once `window` has
//! fully elapsed since then, the counter resets and the next submission is
//! attempt 1 of a new window.
//!
//! Only top-level submissions count. Retries and fallbacks inside one
//! submission never consume additional budget.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Attempt bookkeeping for one message id.
#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    attempt_count: u32,
    last_attempt: Instant,
}

/// Fixed-limit, per-id rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    records: HashMap<String, AttemptRecord>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            records: HashMap::new(),
        }
    }

    /// Decide whether a new submission of `id` is permitted at `now`.
    ///
    /// A rolled-over window resets the counter before the limit is checked,
    /// so the reset and the check happen as one step. The caller must follow
    /// an admitted call with [`RateLimiter::record_attempt`].
    pub fn admit(&mut self, id: &str, now: Instant) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            // Never attempted: behaves like a window that elapsed long ago.
            return true;
        };

        if now.saturating_duration_since(record.last_attempt) >= self.window {
            record.attempt_count = 0;
            return true;
        }

        if record.attempt_count < self.limit {
            return true;
        }

        tracing::debug!(
            message_id = %id,
            attempts = record.attempt_count,
            limit = self.limit,
            "Rate limit exceeded"
        );
        false
    }

    /// Count an admitted submission of `id` made at `now`.
    pub fn record_attempt(&mut self, id: &str, now: Instant) {
        let record = self.records.entry(id.to_string()).or_insert(AttemptRecord {
            attempt_count: 0,
            last_attempt: now,
        });
        record.attempt_count += 1;
        record.last_attempt = now;
    }

    /// Submissions counted in the current window of `id`.
    pub fn attempts(&self, id: &str) -> u32 {
        self.records
            .get(id)
            .map_or(0, |record| record.attempt_count)
    }

    /// Drop entries whose window has elapsed. An elapsed entry admits exactly
    /// like a missing one, so eviction never changes a decision.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.records.len();
        let window = self.window;
        self.records
            .retain(|_, record| now.saturating_duration_since(record.last_attempt) < window);
        before - self.records.len()
    }

    /// Number of ids with a live window.
    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn submit(limiter: &mut RateLimiter, id: &str, now: Instant) -> bool {
        let allowed = limiter.admit(id, now);
        if allowed {
            limiter.record_attempt(id, now);
        }
        allowed
    }

    #[test]
    fn test_first_submission_is_admitted() {
        let mut limiter = RateLimiter::new(5, WINDOW);
        assert!(limiter.admit("1", Instant::now()));
        assert_eq!(limiter.attempts("1"), 0);
    }

    #[test]
    fn test_sixth_submission_in_window_is_denied() {
        let mut limiter = RateLimiter::new(5, WINDOW);
        let start = Instant::now();

        for i in 0..5 {
            assert!(submit(&mut limiter, "1", start + Duration::from_secs(i)));
        }
        assert_eq!(limiter.attempts("1"), 5);
        assert!(!submit(&mut limiter, "1", start + Duration::from_secs(5)));
        // Denied calls are not counted.
        assert_eq!(limiter.attempts("1"), 5);
    }

    #[test]
    fn test_window_rollover_restarts_counter_at_one() {
        let mut limiter = RateLimiter::new(5, WINDOW);
        let start = Instant::now();

        for _ in 0..5 {
            assert!(submit(&mut limiter, "1", start));
        }
        assert!(!submit(&mut limiter, "1", start + Duration::from_secs(59)));

        assert!(submit(&mut limiter, "1", start + WINDOW));
        assert_eq!(limiter.attempts("1"), 1);
    }

    #[test]
    fn test_ids_are_limited_independently() {
        let mut limiter = RateLimiter::new(1, WINDOW);
        let now = Instant::now();

        assert!(submit(&mut limiter, "a", now));
        assert!(!submit(&mut limiter, "a", now));
        assert!(submit(&mut limiter, "b", now));
    }

    #[test]
    fn test_evict_expired() {
        let mut limiter = RateLimiter::new(5, WINDOW);
        let start = Instant::now();

        submit(&mut limiter, "old", start);
        submit(&mut limiter, "new", start + Duration::from_secs(30));
        assert_eq!(limiter.tracked_count(), 2);

        assert_eq!(limiter.evict_expired(start + WINDOW), 1);
        assert_eq!(limiter.attempts("old"), 0);
        assert_eq!(limiter.attempts("new"), 1);
    }
}
