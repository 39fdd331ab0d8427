//! Per-stage runtime settings
//!
//! These control how a single stage buffers and forwards records:
//!
//! - [`StageConfig`] - Buffer capacity, backpressure policy, idle poll interval
//! - [`BackpressurePolicy`] - What `add_to_queue` does when the buffer is full
//! - [`RetryPolicy`] - How often a failed delivery is retried before it is surfaced
//!
//! # Backpressure
//!
//! - **Reject** (default): the enqueue fails with `QueueFull`; nothing is lost silently
//! - **DropOldest**: the head of the buffer is evicted to make room for the newest item
//! - **Block**: the producer waits until the worker frees a slot

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-stage buffer capacity
pub const DEFAULT_STAGE_CAPACITY: usize = 1024;

/// Default idle wait of a drain worker before it re-checks its state
pub const DEFAULT_IDLE_POLL_MS: u64 = 50;

/// Default number of delivery attempts per record
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between delivery attempts
pub const DEFAULT_BACKOFF_MS: u64 = 100;

/// Policy applied when a record is enqueued into a full buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Fail the enqueue with `QueueFull`
    #[default]
    Reject,
    /// Evict the oldest buffered record
    DropOldest,
    /// Wait for the worker to free a slot
    Block,
}

/// Delivery retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per record, including the first one
    pub max_attempts: u32,

    /// Base delay; attempt `n` waits `n * backoff_ms`
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(attempt as u64))
    }
}

/// Settings for one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Maximum number of buffered records
    pub capacity: usize,

    /// What to do when the buffer is full
    pub backpressure: BackpressurePolicy,

    /// How long the drain worker waits for a record before re-checking its state
    pub idle_poll_ms: u64,

    /// Delivery retries
    pub retry: RetryPolicy,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_STAGE_CAPACITY,
            backpressure: BackpressurePolicy::default(),
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl StageConfig {
    /// Create a config with the given capacity and defaults otherwise
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn idle_poll(mut self, idle: Duration) -> Self {
        self.idle_poll_ms = idle.as_millis() as u64;
        self
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    /// Reject settings the stage cannot run with
    pub fn validate(&self) -> PipelineResult<()> {
        if self.capacity == 0 {
            return Err(PipelineError::Configuration { field: "capacity" });
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Configuration {
                field: "max_attempts",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StageConfig::default();
        assert_eq!(config.capacity, DEFAULT_STAGE_CAPACITY);
        assert_eq!(config.backpressure, BackpressurePolicy::Reject);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = StageConfig::with_capacity(0).validate().unwrap_err();
        assert_eq!(err.field(), Some("capacity"));

        let err = StageConfig::default()
            .retry(RetryPolicy {
                max_attempts: 0,
                backoff_ms: 10,
            })
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("max_attempts"));
    }

    #[test]
    fn test_linear_backoff() {
        let retry = RetryPolicy {
            max_attempts: 4,
            backoff_ms: 20,
        };
        assert_eq!(retry.delay_after(1), Duration::from_millis(20));
        assert_eq!(retry.delay_after(3), Duration::from_millis(60));
        assert_eq!(RetryPolicy::none().delay_after(5), Duration::ZERO);
    }

    #[test]
    fn test_policy_names() {
        let config: StageConfig = toml::from_str("backpressure = \"drop_oldest\"").unwrap();
        assert_eq!(config.backpressure, BackpressurePolicy::DropOldest);
        assert_eq!(config.capacity, DEFAULT_STAGE_CAPACITY);
    }
}
