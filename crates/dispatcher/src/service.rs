//! Dispatch service, the public entry point.
//!
//! Ties deduplication, rate limiting and fallback dispatch together:
//! 1. Skip ids that were already delivered (`skipped`)
//! 2. Deny ids over their submission budget (`rate-limited`)
//! 3. Count the submission, mark it `pending`
//! 4. Run the fallback dispatcher and record `sent` or `failed`
//!
//! One submission per id runs at a time: an id-scoped async mutex serializes
//! concurrent `send` calls for the same id, while different ids proceed
//! independently.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;

use herald_common::config::DispatchConfig;
use herald_common::error::DispatchError;
use herald_common::types::{DispatchStatus, Message};

use crate::fallback::{FallbackDispatcher, FallbackOutcome};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryScheduler;
use crate::sender::Sender;
use crate::state::{DispatchRecord, DispatchState};

/// What one eviction sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub records: usize,
    pub rate_windows: usize,
    pub id_locks: usize,
}

struct Inner {
    config: DispatchConfig,
    state: Mutex<DispatchState>,
    limiter: Mutex<RateLimiter>,
    dispatcher: FallbackDispatcher,
    id_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    tasks: Mutex<JoinSet<()>>,
}

/// Deduplicating, rate-limited dispatcher over an ordered list of senders.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct DispatchService {
    inner: Arc<Inner>,
}

impl DispatchService {
    /// Build a service over `senders`, tried in the given order.
    pub fn new(
        config: DispatchConfig,
        senders: Vec<Arc<dyn Sender>>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        let scheduler = RetryScheduler::new(
            config.max_retries,
            config.base_backoff(),
            config.max_backoff(),
        );
        let dispatcher = FallbackDispatcher::new(senders, scheduler)?;
        let limiter = RateLimiter::new(config.rate_limit, config.rate_window());

        tracing::info!(
            senders = dispatcher.sender_count(),
            max_retries = config.max_retries,
            rate_limit = config.rate_limit,
            rate_window_ms = config.rate_window_ms,
            "Dispatch service created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(DispatchState::new()),
                limiter: Mutex::new(limiter),
                dispatcher,
                id_locks: DashMap::new(),
                tasks: Mutex::new(JoinSet::new()),
            }),
        })
    }

    /// Run the full pipeline for `message` and return the status it ends in.
    ///
    /// Never fails: sender errors are absorbed by retry and fallback and
    /// surface only as a `failed` status.
    pub async fn send(&self, message: &Message) -> DispatchStatus {
        let id = message.id.as_str();
        let _guard = self.id_lock(id).lock_owned().await;

        {
            let mut state = self.inner.state.lock();
            if state.has_been_sent(id) {
                state.set_status(id, DispatchStatus::Skipped);
                tracing::info!(message_id = %id, "Message already sent, skipping");
                return DispatchStatus::Skipped;
            }
        }

        let now = Instant::now();
        let admitted = {
            let mut limiter = self.inner.limiter.lock();
            let admitted = limiter.admit(id, now);
            if admitted {
                limiter.record_attempt(id, now);
            }
            admitted
        };
        if !admitted {
            self.inner
                .state
                .lock()
                .set_status(id, DispatchStatus::RateLimited);
            tracing::warn!(message_id = %id, "Rate limit exceeded for message");
            return DispatchStatus::RateLimited;
        }

        self.inner
            .state
            .lock()
            .set_status(id, DispatchStatus::Pending);
        let _in_flight = InFlight {
            state: &self.inner.state,
            id,
        };

        match self.inner.dispatcher.dispatch(message).await {
            FallbackOutcome::Sent {
                sender,
                invocations,
            } => {
                self.inner
                    .state
                    .lock()
                    .record_delivery(id, &sender, invocations);
                DispatchStatus::Sent
            }
            FallbackOutcome::AllFailed {
                errors,
                invocations,
            } => {
                let error = DispatchError::AllSendersExhausted {
                    senders: errors.len(),
                };
                let detail = errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                self.inner
                    .state
                    .lock()
                    .record_failure(id, format!("{error}: {detail}"), invocations);
                DispatchStatus::Failed
            }
        }
    }

    /// Run the pipeline for `message` in the background.
    ///
    /// The outcome is observed through [`DispatchService::get_status`].
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, message: Message) {
        let service = self.clone();
        let mut tasks = self.inner.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "Background dispatch task failed");
            }
        }
        tasks.spawn(async move {
            service.send(&message).await;
        });
    }

    pub fn get_status(&self, id: &str) -> Option<DispatchStatus> {
        self.inner.state.lock().get_status(id)
    }

    pub fn get_all_statuses(&self) -> HashMap<String, DispatchStatus> {
        self.inner.state.lock().all_statuses()
    }

    pub fn record(&self, id: &str) -> Option<DispatchRecord> {
        self.inner.state.lock().record(id)
    }

    /// Submissions of `id` counted in its current rate-limit window.
    pub fn attempts_in_window(&self, id: &str) -> u32 {
        self.inner.limiter.lock().attempts(id)
    }

    /// Evict idle records, elapsed rate-limit windows and unused id locks.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let config = &self.inner.config;

        let records = self.inner.state.lock().evict_idle(
            now,
            config.idle_record_ttl(),
            config.sent_record_ttl(),
        );
        let (rate_windows, tracked_windows) = {
            let mut limiter = self.inner.limiter.lock();
            (limiter.evict_expired(now), limiter.tracked_count())
        };

        let locks_before = self.inner.id_locks.len();
        self.inner
            .id_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        let id_locks = locks_before.saturating_sub(self.inner.id_locks.len());

        let report = SweepReport {
            records,
            rate_windows,
            id_locks,
        };
        if report != SweepReport::default() {
            tracing::debug!(?report, tracked_windows, "Dispatch state swept");
        }
        report
    }

    /// Sweep periodically on a background task until shutdown.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sweeper(&self) {
        let inner = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval();

        self.inner.tasks.lock().spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                DispatchService { inner }.sweep();
            }
        });
    }

    /// Cancel the sweeper and every background submission, then wait for
    /// them to stop. Pending backoff timers are dropped with their tasks;
    /// submissions cut short are marked `failed`.
    pub async fn shutdown(&self) {
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock());
        let outstanding = tasks.len();
        tasks.shutdown().await;
        tracing::info!(outstanding, "Dispatch service shut down");
    }

    fn id_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner.id_locks.entry(id.to_string()).or_default().clone()
    }
}

/// Marks a submission `failed` if its `send` future is dropped before the
/// pipeline records an outcome.
struct InFlight<'a> {
    state: &'a Mutex<DispatchState>,
    id: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.state.lock().abandon(self.id) {
            tracing::warn!(message_id = %self.id, "Dispatch cancelled before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct Reliable;

    #[async_trait]
    impl Sender for Reliable {
        fn name(&self) -> &str {
            "reliable"
        }

        async fn send(&self, _message: &Message) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn message(id: &str) -> Message {
        Message::with_id(id, "test@example.com", "Hello", "World")
    }

    fn reliable() -> Vec<Arc<dyn Sender>> {
        vec![Arc::new(Reliable) as Arc<dyn Sender>]
    }

    fn service(config: DispatchConfig) -> DispatchService {
        DispatchService::new(config, reliable()).unwrap()
    }

    #[test]
    fn test_rejects_empty_sender_list() {
        let result = DispatchService::new(DispatchConfig::default(), Vec::new());
        assert!(matches!(result, Err(DispatchError::NoSenders)));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = DispatchConfig {
            rate_limit: 0,
            ..DispatchConfig::default()
        };
        let result = DispatchService::new(config, reliable());
        assert!(matches!(result, Err(DispatchError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_then_skip() {
        let service = service(DispatchConfig::default());

        assert_eq!(service.send(&message("1")).await, DispatchStatus::Sent);
        assert_eq!(service.send(&message("1")).await, DispatchStatus::Skipped);
        assert_eq!(service.get_status("1"), Some(DispatchStatus::Skipped));

        let record = service.record("1").unwrap();
        assert_eq!(record.delivered_by.as_deref(), Some("reliable"));
        // Skipped submissions do not count against the rate limit.
        assert_eq!(service.attempts_in_window("1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_id_has_no_status() {
        let service = service(DispatchConfig::default());
        assert_eq!(service.get_status("nope"), None);
        assert!(service.get_all_statuses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_unused_id_locks() {
        let service = service(DispatchConfig::default());
        service.send(&message("1")).await;
        service.send(&message("2")).await;

        let report = service.sweep();
        assert_eq!(report.id_locks, 2);
        assert_eq!(report.records, 0);
        // Delivered ids are still recognised after the sweep.
        assert_eq!(service.send(&message("1")).await, DispatchStatus::Skipped);
    }
}
