//! Delivery backend capability.
//!
//! A `Sender` wraps one concrete transport (SMTP relay, HTTP API, queue).
//! The dispatch layer assumes nothing beyond "the call succeeded or it did
//! not": no partial success and no idempotency on the backend side.

use async_trait::async_trait;

use herald_common::types::Message;

/// An interchangeable delivery backend.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Short name used in logs and dispatch records.
    fn name(&self) -> &str;

    /// Attempt a single delivery of `message`.
    async fn send(&self, message: &Message) -> anyhow::Result<()>;
}

/// Demo backend that fails with a fixed probability.
pub struct SimulatedSender {
    name: String,
    failure_rate: f64,
}

impl SimulatedSender {
    /// `failure_rate` is clamped to `0.0..=1.0`; NaN counts as always failing.
    pub fn new(name: impl Into<String>, failure_rate: f64) -> Self {
        let failure_rate = if failure_rate.is_nan() {
            1.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        Self {
            name: name.into(),
            failure_rate,
        }
    }
}

#[async_trait]
impl Sender for SimulatedSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> anyhow::Result<()> {
        tracing::debug!(
            sender = %self.name,
            message_id = %message.id,
            recipient = %message.recipient,
            "Simulated delivery attempt"
        );

        if rand::random_bool(self.failure_rate) {
            anyhow::bail!("{} failed", self.name);
        }
        Ok(())
    }
}
