//! Per-message-id delivery bookkeeping.
//!
//! Tracks which ids were delivered (the sent set used for deduplication) and
//! the latest status of every id seen. State is held in-memory only: a process
//! restart forgets every record, including the sent set.
//!
//! Records are evicted by [`DispatchState::evict_idle`] once they have been
//! idle long enough, so the maps stay bounded by recent traffic.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use herald_common::types::DispatchStatus;

/// Snapshot of the bookkeeping held for one message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub status: DispatchStatus,
    /// Sender that delivered the message, once sent.
    pub delivered_by: Option<String>,
    /// Failure text of the most recent failed submission.
    pub last_error: Option<String>,
    /// Sender invocations made by the most recent dispatched submission.
    pub invocations: u32,
    updated_at: Instant,
}

impl DispatchRecord {
    fn new(status: DispatchStatus, now: Instant) -> Self {
        Self {
            status,
            delivered_by: None,
            last_error: None,
            invocations: 0,
            updated_at: now,
        }
    }
}

/// In-memory dispatch state, exclusively owned by one `DispatchService`.
#[derive(Debug, Default)]
pub struct DispatchState {
    /// Delivered ids and when they were delivered.
    sent: HashMap<String, Instant>,
    records: HashMap<String, DispatchRecord>,
}

impl DispatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` has been delivered at least once.
    pub fn has_been_sent(&self, id: &str) -> bool {
        self.sent.contains_key(id)
    }

    /// Add `id` to the sent set and mark it sent. Idempotent: repeated calls
    /// keep the first delivery time.
    pub fn mark_sent(&mut self, id: &str) {
        let now = Instant::now();
        self.sent.entry(id.to_string()).or_insert(now);
        self.set_status(id, DispatchStatus::Sent);
    }

    /// Overwrite the current status of `id`.
    pub fn set_status(&mut self, id: &str, status: DispatchStatus) {
        let now = Instant::now();
        let record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| DispatchRecord::new(status, now));
        record.status = status;
        record.updated_at = now;
    }

    /// Mark `id` sent and note which sender delivered it.
    pub fn record_delivery(&mut self, id: &str, sender: &str, invocations: u32) {
        self.mark_sent(id);
        if let Some(record) = self.records.get_mut(id) {
            record.delivered_by = Some(sender.to_string());
            record.last_error = None;
            record.invocations = invocations;
        }
    }

    /// Mark `id` failed and keep the failure text for inspection.
    pub fn record_failure(&mut self, id: &str, error: String, invocations: u32) {
        self.set_status(id, DispatchStatus::Failed);
        if let Some(record) = self.records.get_mut(id) {
            record.last_error = Some(error);
            record.invocations = invocations;
        }
    }

    /// Mark an in-flight submission of `id` failed because it was cancelled.
    ///
    /// No-op unless `id` is still `pending`. Returns whether it was changed.
    pub fn abandon(&mut self, id: &str) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }
        record.status = DispatchStatus::Failed;
        record.last_error = Some("dispatch cancelled before completion".to_string());
        record.updated_at = Instant::now();
        true
    }

    pub fn get_status(&self, id: &str) -> Option<DispatchStatus> {
        self.records.get(id).map(|record| record.status)
    }

    pub fn record(&self, id: &str) -> Option<DispatchRecord> {
        self.records.get(id).cloned()
    }

    /// Current status of every tracked id.
    pub fn all_statuses(&self) -> HashMap<String, DispatchStatus> {
        self.records
            .iter()
            .map(|(id, record)| (id.clone(), record.status))
            .collect()
    }

    /// Number of tracked ids.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop records nobody needs any more.
    ///
    /// - Delivered ids are kept for `sent_ttl` after delivery, which bounds how
    ///   long a resubmission is still recognised as a duplicate.
    /// - Other finished records are dropped after `idle_ttl` without updates.
    /// - Pending records are never evicted.
    ///
    /// Returns the number of records removed.
    pub fn evict_idle(&mut self, now: Instant, idle_ttl: Duration, sent_ttl: Duration) -> usize {
        self.sent
            .retain(|_, sent_at| now.saturating_duration_since(*sent_at) < sent_ttl);

        let sent = &self.sent;
        let before = self.records.len();
        self.records.retain(|id, record| {
            if record.status == DispatchStatus::Pending || sent.contains_key(id) {
                return true;
            }
            now.saturating_duration_since(record.updated_at) < idle_ttl
        });

        let evicted = before - self.records.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.records.len(), "Evicted idle dispatch records");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_secs(600);
    const SENT: Duration = Duration::from_secs(86_400);

    #[test]
    fn test_unknown_id_has_no_status() {
        let state = DispatchState::new();
        assert!(!state.has_been_sent("missing"));
        assert_eq!(state.get_status("missing"), None);
        assert!(state.is_empty());
    }

    #[test]
    fn test_mark_sent_is_idempotent() {
        let mut state = DispatchState::new();
        state.mark_sent("1");
        state.mark_sent("1");

        assert!(state.has_been_sent("1"));
        assert_eq!(state.get_status("1"), Some(DispatchStatus::Sent));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_set_status_overwrites_unconditionally() {
        let mut state = DispatchState::new();
        state.set_status("1", DispatchStatus::Pending);
        state.set_status("1", DispatchStatus::Failed);
        assert_eq!(state.get_status("1"), Some(DispatchStatus::Failed));

        // Overwriting the status does not make an id "sent".
        state.set_status("1", DispatchStatus::Sent);
        assert!(!state.has_been_sent("1"));

        // A skipped status after delivery keeps the id in the sent set.
        state.mark_sent("2");
        state.set_status("2", DispatchStatus::Skipped);
        assert!(state.has_been_sent("2"));
        assert_eq!(state.get_status("2"), Some(DispatchStatus::Skipped));
    }

    #[test]
    fn test_delivery_and_failure_details() {
        let mut state = DispatchState::new();
        state.record_failure("1", "all senders exhausted".to_string(), 12);
        let record = state.record("1").unwrap();
        assert_eq!(record.status, DispatchStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("all senders exhausted"));
        assert_eq!(record.invocations, 12);

        state.record_delivery("1", "backup", 1);
        let record = state.record("1").unwrap();
        assert_eq!(record.status, DispatchStatus::Sent);
        assert_eq!(record.delivered_by.as_deref(), Some("backup"));
        assert_eq!(record.last_error, None);
        assert!(state.has_been_sent("1"));
    }

    #[test]
    fn test_abandon_only_touches_pending() {
        let mut state = DispatchState::new();
        assert!(!state.abandon("missing"));

        state.set_status("1", DispatchStatus::Pending);
        assert!(state.abandon("1"));
        let record = state.record("1").unwrap();
        assert_eq!(record.status, DispatchStatus::Failed);
        assert!(record.last_error.unwrap().contains("cancelled"));

        state.mark_sent("2");
        assert!(!state.abandon("2"));
        assert_eq!(state.get_status("2"), Some(DispatchStatus::Sent));
    }

    #[test]
    fn test_all_statuses() {
        let mut state = DispatchState::new();
        state.mark_sent("a");
        state.set_status("b", DispatchStatus::RateLimited);

        let statuses = state.all_statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses["a"], DispatchStatus::Sent);
        assert_eq!(statuses["b"], DispatchStatus::RateLimited);
    }

    #[test]
    fn test_evict_idle_keeps_recent_and_pending() {
        let mut state = DispatchState::new();
        state.set_status("failed", DispatchStatus::Failed);
        state.set_status("pending", DispatchStatus::Pending);
        state.mark_sent("sent");

        let now = Instant::now();
        assert_eq!(state.evict_idle(now, IDLE, SENT), 0);

        let later = now + IDLE + Duration::from_secs(1);
        assert_eq!(state.evict_idle(later, IDLE, SENT), 1);
        assert_eq!(state.get_status("failed"), None);
        assert_eq!(state.get_status("pending"), Some(DispatchStatus::Pending));
        assert!(state.has_been_sent("sent"));
    }

    #[test]
    fn test_evict_idle_forgets_sent_after_ttl() {
        let mut state = DispatchState::new();
        state.mark_sent("sent");

        let later = Instant::now() + SENT + IDLE + Duration::from_secs(1);
        assert_eq!(state.evict_idle(later, IDLE, SENT), 1);
        assert!(!state.has_been_sent("sent"));
        assert!(state.is_empty());
    }
}
