//! Per-subtask retry budget and backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay schedule between subtask attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retry immediately.
    None,
    Fixed {
        delay_ms: u64,
    },
    /// `base * attempt`, capped at `max`.
    Linear {
        base_ms: u64,
        max_ms: u64,
    },
    /// `base * multiplier^(attempt - 1)`, capped at `max`.
    Exponential {
        base_ms: u64,
        multiplier: f64,
        max_ms: u64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            base_ms: 100,
            multiplier: 2.0,
            max_ms: 30_000,
        }
    }
}

impl BackoffStrategy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Self::Linear { base_ms, max_ms } => {
                Duration::from_millis(base_ms.saturating_mul(u64::from(attempt)).min(*max_ms))
            }
            Self::Exponential {
                base_ms,
                multiplier,
                max_ms,
            } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let raw = (*base_ms as f64) * multiplier.powi(exponent);
                let capped = if raw.is_finite() {
                    raw.min(*max_ms as f64)
                } else {
                    *max_ms as f64
                };
                Duration::from_millis(capped.max(0.0) as u64)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Limit applied to every single attempt.
    pub timeout_ms: Option<u64>,
}

/// Attempt limit for policies that do not set one.
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 600_000;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            timeout_ms: Some(DEFAULT_ATTEMPT_TIMEOUT_MS),
        }
    }
}

impl RetryPolicy {
    /// # Panics
    ///
    /// Panics if `max_attempts` is zero.
    pub fn new(max_attempts: u32) -> Self {
        assert!(max_attempts >= 1, "max_attempts must be at least 1");
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffStrategy::None,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
