use std::time::Duration;

use serde::Deserialize;

use crate::error::DispatchError;

/// Dispatch configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Admitted submissions per message id within one window (default: 5)
    pub rate_limit: u32,

    /// Rate-limit window in milliseconds (default: 60000)
    pub rate_window_ms: u64,

    /// Retries per sender after the first attempt (default: 5, i.e. 6 attempts)
    pub max_retries: u32,

    /// Delay after the first failed attempt; doubles on each retry (default: 1000)
    pub base_backoff_ms: u64,

    /// Upper bound for a single backoff delay (default: 300000)
    pub max_backoff_ms: u64,

    /// Idle time after which a finished, unsent record is evicted (default: 600)
    pub idle_record_ttl_secs: u64,

    /// Time a delivered id is remembered for deduplication (default: 86400)
    pub sent_record_ttl_secs: u64,

    /// Interval between eviction sweeps (default: 60)
    pub sweep_interval_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit: 5,
            rate_window_ms: 60_000,
            max_retries: 5,
            base_backoff_ms: 1_000,
            max_backoff_ms: 300_000,
            idle_record_ttl_secs: 600,
            sent_record_ttl_secs: 86_400,
            sweep_interval_secs: 60,
        }
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            rate_limit: parse_var("DISPATCH_RATE_LIMIT", "5")?,
            rate_window_ms: parse_var("DISPATCH_RATE_WINDOW_MS", "60000")?,
            max_retries: parse_var("DISPATCH_MAX_RETRIES", "5")?,
            base_backoff_ms: parse_var("DISPATCH_BASE_BACKOFF_MS", "1000")?,
            max_backoff_ms: parse_var("DISPATCH_MAX_BACKOFF_MS", "300000")?,
            idle_record_ttl_secs: parse_var("DISPATCH_IDLE_RECORD_TTL_SECS", "600")?,
            sent_record_ttl_secs: parse_var("DISPATCH_SENT_RECORD_TTL_SECS", "86400")?,
            sweep_interval_secs: parse_var("DISPATCH_SWEEP_INTERVAL_SECS", "60")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would disable admission, backoff or deduplication.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.rate_limit == 0 {
            return Err(DispatchError::Config(
                "rate_limit must be at least 1".to_string(),
            ));
        }
        if self.rate_window_ms == 0 {
            return Err(DispatchError::Config(
                "rate_window_ms must be positive".to_string(),
            ));
        }
        if self.base_backoff_ms == 0 {
            return Err(DispatchError::Config(
                "base_backoff_ms must be positive".to_string(),
            ));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(DispatchError::Config(format!(
                "max_backoff_ms ({}) must not be below base_backoff_ms ({})",
                self.max_backoff_ms, self.base_backoff_ms
            )));
        }
        if self.idle_record_ttl_secs == 0 {
            return Err(DispatchError::Config(
                "idle_record_ttl_secs must be positive".to_string(),
            ));
        }
        // A delivered id must be remembered at least as long as its rate window.
        if self.sent_record_ttl() < self.rate_window() {
            return Err(DispatchError::Config(format!(
                "sent_record_ttl_secs ({}) must cover rate_window_ms ({})",
                self.sent_record_ttl_secs, self.rate_window_ms
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(DispatchError::Config(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn idle_record_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_record_ttl_secs)
    }

    pub fn sent_record_ttl(&self) -> Duration {
        Duration::from_secs(self.sent_record_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> anyhow::Result<T> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| anyhow::anyhow!("{name} must be a valid {}", std::any::type_name::<T>()))
}
