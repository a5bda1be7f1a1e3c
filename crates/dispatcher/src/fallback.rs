//! Fallback dispatch across an ordered list of senders.
//!
//! Exhausting a sender is recoverable: the dispatcher moves to the next one.
//! Exhausting the last sender is not. Every failure kind advances to the next
//! sender; the dispatcher does not distinguish transient from programming
//! errors reported by a backend.

use std::sync::Arc;

use herald_common::error::DispatchError;
use herald_common::types::Message;

use crate::retry::{RetryOutcome, RetryScheduler};
use crate::sender::Sender;

/// Result of dispatching one message across all senders.
#[derive(Debug)]
pub enum FallbackOutcome {
    Sent {
        /// Name of the sender that delivered the message.
        sender: String,
        /// Sender invocations across all senders, including the successful one.
        invocations: u32,
    },
    AllFailed {
        /// One `RetriesExhausted` per sender, in sender order.
        errors: Vec<DispatchError>,
        invocations: u32,
    },
}

/// Runs the retry scheduler against an ordered list of senders.
pub struct FallbackDispatcher {
    senders: Vec<Arc<dyn Sender>>,
    scheduler: RetryScheduler,
}

impl FallbackDispatcher {
    /// Fails with `DispatchError::NoSenders` for an empty sender list.
    pub fn new(
        senders: Vec<Arc<dyn Sender>>,
        scheduler: RetryScheduler,
    ) -> Result<Self, DispatchError> {
        if senders.is_empty() {
            return Err(DispatchError::NoSenders);
        }
        Ok(Self { senders, scheduler })
    }

    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }

    /// Deliver `message` through the first sender that succeeds.
    ///
    /// Each sender's retry run is awaited to completion before the next
    /// sender starts, so attempts for one message never overlap.
    pub async fn dispatch(&self, message: &Message) -> FallbackOutcome {
        let mut errors = Vec::with_capacity(self.senders.len());
        let mut invocations = 0;

        for (index, sender) in self.senders.iter().enumerate() {
            match self.scheduler.run(sender.as_ref(), message).await {
                RetryOutcome::Sent { attempts } => {
                    return FallbackOutcome::Sent {
                        sender: sender.name().to_string(),
                        invocations: invocations + attempts,
                    };
                }
                RetryOutcome::Exhausted(error) => {
                    invocations += self.scheduler.max_attempts();
                    if index + 1 < self.senders.len() {
                        tracing::warn!(
                            message_id = %message.id,
                            error = %error,
                            next_sender = self.senders[index + 1].name(),
                            "Sender exhausted, falling back"
                        );
                    }
                    errors.push(error);
                }
            }
        }

        tracing::error!(
            message_id = %message.id,
            senders = self.senders.len(),
            "All senders failed to deliver message"
        );
        FallbackOutcome::AllFailed {
            errors,
            invocations,
        }
    }
}
