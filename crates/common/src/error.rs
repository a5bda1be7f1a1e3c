use thiserror::Error;

/// Error taxonomy of the dispatch layer.
///
/// None of these escape `DispatchService::send`: sender failures are absorbed
/// by retry and fallback, and the caller only observes the final status.
/// Duplicate submissions and rate limiting are statuses, not errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A single delivery attempt failed. Retried with backoff.
    #[error("Send failure via {sender}: {reason}")]
    SendFailure { sender: String, reason: String },

    /// One sender failed every attempt up to the retry ceiling. Triggers fallback.
    #[error("Retries exhausted for {sender} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        sender: String,
        attempts: u32,
        last_error: String,
    },

    /// Every configured sender was exhausted. The message is marked failed.
    #[error("All {senders} senders exhausted")]
    AllSendersExhausted { senders: usize },

    #[error("No senders configured")]
    NoSenders,

    #[error("Configuration error: {0}")]
    Config(String),
}
