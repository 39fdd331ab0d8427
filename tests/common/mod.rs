//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use illuminati_pipeline::{RetryPolicy, StageConfig};
use std::time::Duration;

/// Stage settings tuned for fast tests: short idle poll, quick retries
pub fn fast_stage(capacity: usize) -> StageConfig {
    StageConfig::with_capacity(capacity)
        .retry(RetryPolicy {
            max_attempts: 100,
            backoff_ms: 1,
        })
        .idle_poll(Duration::from_millis(5))
}
