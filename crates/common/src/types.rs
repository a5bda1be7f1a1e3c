use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dispatch status of a message id.
///
/// `Sent` is permanently terminal. `Failed`, `Skipped` and `RateLimited` end a
/// single submission but a later submission of the same id may still run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
    RateLimited,
}

impl DispatchStatus {
    /// Whether no further automatic transition follows for the submission.
    pub fn is_terminal(self) -> bool {
        !matches!(self, DispatchStatus::Pending)
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchStatus::Pending => write!(f, "pending"),
            DispatchStatus::Sent => write!(f, "sent"),
            DispatchStatus::Failed => write!(f, "failed"),
            DispatchStatus::Skipped => write!(f, "skipped"),
            DispatchStatus::RateLimited => write!(f, "rate-limited"),
        }
    }
}

/// A logical message handed to the dispatch layer.
///
/// Only `id` is interpreted: it must stay stable across resubmissions of the
/// same logical message, since deduplication and rate limiting key on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl Message {
    /// Build a message with a freshly generated id.
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), recipient, subject, body)
    }

    /// Build a message with a caller-chosen id.
    pub fn with_id(
        id: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_kebab_case() {
        let json = serde_json::to_string(&DispatchStatus::RateLimited).unwrap();
        assert_eq!(json, "\"rate-limited\"");

        let parsed: DispatchStatus = serde_json::from_str("\"skipped\"").unwrap();
        assert_eq!(parsed, DispatchStatus::Skipped);
    }

    #[test]
    fn test_status_display_matches_serde() {
        for status in [
            DispatchStatus::Pending,
            DispatchStatus::Sent,
            DispatchStatus::Failed,
            DispatchStatus::Skipped,
            DispatchStatus::RateLimited,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn test_only_pending_is_not_terminal() {
        assert!(!DispatchStatus::Pending.is_terminal());
        assert!(DispatchStatus::Sent.is_terminal());
        assert!(DispatchStatus::RateLimited.is_terminal());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Message::new("test@example.com", "Hello", "World");
        let b = Message::new("test@example.com", "Hello", "World");
        assert_ne!(a.id, b.id);
        assert_eq!(a.recipient, "test@example.com");
    }
}
