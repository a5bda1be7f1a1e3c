//! At-most-once message dispatch over interchangeable delivery backends.
//!
//! - Deduplication by message id (`skipped` after a successful delivery)
//! - Per-id submission rate limiting (`rate-limited`)
//! - Retry with exponential backoff against each backend
//! - Fallback to the next backend once one is exhausted
//! - Status tracking (pending → sent | failed)

pub mod fallback;
pub mod rate_limiter;
pub mod retry;
pub mod sender;
pub mod service;
pub mod state;

pub use fallback::{FallbackDispatcher, FallbackOutcome};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryOutcome, RetryScheduler};
pub use sender::{Sender, SimulatedSender};
pub use service::{DispatchService, SweepReport};
pub use state::{DispatchRecord, DispatchState};
