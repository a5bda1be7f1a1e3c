//! Exponential-backoff retries against a single sender.
//!
//! Attempt 0 is the first try. After attempt `k` fails the scheduler waits
//! `base * 2^k` (capped at `max_delay`) before attempt `k + 1`. Once
//! `max_retries + 1` attempts have failed the sender is reported exhausted.
//! No jitter is applied, so schedules are reproducible.
//!
//! `run` resolves exactly once with the outcome. Waiting uses tokio timers:
//! a pending retry never blocks other dispatches, and dropping the future
//! cancels it.

use std::time::Duration;

use herald_common::error::DispatchError;
use herald_common::types::Message;

use crate::sender::Sender;

/// Result of running the scheduler against one sender.
#[derive(Debug)]
pub enum RetryOutcome {
    /// Delivered on the `attempts`-th invocation.
    Sent { attempts: u32 },
    /// Every attempt failed; carries `DispatchError::RetriesExhausted`.
    Exhausted(DispatchError),
}

/// Drives retries of one sender for one message.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryScheduler {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Total attempts made before a sender is exhausted.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after attempt `attempt` (0-indexed) has failed.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// Attempt delivery through `sender` until it succeeds or is exhausted.
    pub async fn run(&self, sender: &dyn Sender, message: &Message) -> RetryOutcome {
        let mut last_error = String::new();

        for attempt in 0..self.max_attempts() {
            match sender.send(message).await {
                Ok(()) => {
                    tracing::info!(
                        message_id = %message.id,
                        sender = sender.name(),
                        attempt,
                        "Message delivered"
                    );
                    return RetryOutcome::Sent {
                        attempts: attempt + 1,
                    };
                }
                Err(e) => {
                    last_error = format!("{e:#}");
                    let failure = DispatchError::SendFailure {
                        sender: sender.name().to_string(),
                        reason: last_error.clone(),
                    };

                    if attempt == self.max_retries {
                        tracing::warn!(
                            message_id = %message.id,
                            attempt,
                            error = %failure,
                            "Final attempt failed"
                        );
                        break;
                    }

                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        message_id = %message.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        RetryOutcome::Exhausted(DispatchError::RetriesExhausted {
            sender: sender.name().to_string(),
            attempts: self.max_attempts(),
            last_error,
        })
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(300))
    }
}
