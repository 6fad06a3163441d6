//! Retry policies and backoff computation
//!
//! A [`RetryPolicy`] is constructed once per provider at registration time
//! and consulted on every attempt. Delay computation is a pure function of
//! the attempt number so it can be tested without sleeping.

use crate::models::{AttemptError, FailureKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// How inter-attempt delays grow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay between every attempt.
    Fixed,
    /// Delay grows proportionally with the attempt number.
    Linear,
    /// Delay multiplies by `exponential_base` each attempt.
    Exponential,
    /// Delay follows the Fibonacci sequence scaled by the base delay.
    Fibonacci,
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strategy = match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Exponential => "exponential",
            BackoffStrategy::Fibonacci => "fibonacci",
        };
        write!(f, "{}", strategy)
    }
}

/// Per-provider retry configuration. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Base delay between attempts, in seconds.
    pub base_delay: f64,
    /// Ceiling applied to computed delays, in seconds.
    pub max_delay: f64,
    /// Growth factor for the exponential strategy.
    pub exponential_base: f64,
    /// Delay growth strategy.
    pub strategy: BackoffStrategy,
    /// Whether to randomize delays to avoid thundering herds.
    pub jitter: bool,
    /// Jitter spread as a fraction: factor drawn from
    /// [1 - jitter_range, 1 + jitter_range].
    pub jitter_range: f64,
    /// Status codes that count as retryable failures.
    pub retry_on_status: HashSet<u16>,
    /// Failure kinds that count as retryable.
    pub retry_on_errors: HashSet<FailureKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: 1.0,
            max_delay: 60.0,
            exponential_base: 2.0,
            strategy: BackoffStrategy::Exponential,
            jitter: true,
            jitter_range: 0.25,
            retry_on_status: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            retry_on_errors: [
                FailureKind::Timeout,
                FailureKind::Connection,
                FailureKind::Server,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryPolicy {
    /// Check the policy for configuration mistakes. Called at registration;
    /// call-time execution assumes a valid policy.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.base_delay.is_finite() || self.base_delay < 0.0 {
            return Err("base_delay must be a non-negative number of seconds".to_string());
        }
        if !self.max_delay.is_finite() || self.max_delay < self.base_delay {
            return Err("max_delay must be at least base_delay".to_string());
        }
        if self.strategy == BackoffStrategy::Exponential
            && (!self.exponential_base.is_finite() || self.exponential_base < 1.0)
        {
            return Err("exponential_base must be at least 1.0".to_string());
        }
        if !self.jitter_range.is_finite() || !(0.0..1.0).contains(&self.jitter_range) {
            return Err("jitter_range must be in [0, 1)".to_string());
        }
        Ok(())
    }

    /// Delay to sleep after attempt `attempt` (1-based) fails, before the
    /// next attempt starts. Capped at `max_delay`, then jittered.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay * attempt as f64,
            BackoffStrategy::Exponential => {
                self.base_delay * self.exponential_base.powi(attempt as i32 - 1)
            }
            BackoffStrategy::Fibonacci => self.base_delay * fibonacci(attempt) as f64,
        };

        let capped = raw.min(self.max_delay);
        let delayed = if self.jitter {
            let factor = rand::thread_rng()
                .gen_range(1.0 - self.jitter_range..=1.0 + self.jitter_range);
            capped * factor
        } else {
            capped
        };

        Duration::from_secs_f64(delayed.max(0.0))
    }

    /// Whether a failed attempt with this error should be retried.
    pub fn should_retry(&self, error: &AttemptError) -> bool {
        if self.retry_on_errors.contains(&error.kind) {
            return true;
        }
        error
            .status_code
            .map(|code| self.retry_on_status.contains(&code))
            .unwrap_or(false)
    }

    /// Whether a nominally successful response carries a status code the
    /// policy treats as a failure.
    pub fn is_retryable_status(&self, status_code: u16) -> bool {
        self.retry_on_status.contains(&status_code)
    }
}

/// fib(1) = fib(2) = 1, saturating for large inputs.
fn fibonacci(n: u32) -> u64 {
    let (mut prev, mut current) = (0u64, 1u64);
    for _ in 1..n {
        let next = prev.saturating_add(current);
        prev = current;
        current = next;
    }
    current
}
