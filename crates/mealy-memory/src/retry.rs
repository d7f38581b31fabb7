//! Exponential backoff for store commands.
//!
//! # Default policy
//!
//! - Max attempts: 11 (the first try plus ten retries)
//! - Base delay: 1s, doubled after every failed attempt
//! - Max delay: 60s
//!
//! A failed attempt drops the connection; the next attempt reconnects first.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff configuration for transient store failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Total attempts per command, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Factor applied to the delay after every retry.
    pub multiplier: f64,
    /// Upper bound for a single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 11,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    /// Millisecond-scale policy for tests and local in-memory runs.
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1,
            multiplier: 2.0,
            max_delay_ms: 10,
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::fast()
        }
    }

    /// Attempts actually made; at least one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (0 before the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let millis = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }
}
