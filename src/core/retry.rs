//! Retry policy configuration for tasks.
//!
//! Supports bounded attempts with exponential backoff: the delay before the
//! n-th retry grows from a base value by a multiplier and is capped.

use std::time::Duration;

use super::task::TaskError;

/// Retry policy for a task.
///
/// Defines how a task should be retried on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial one (minimum 1).
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Factor applied to the delay after each failed retry.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Condition for when to retry.
    pub retry_on: RetryCondition,
}

/// Conditions under which a task should be retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryCondition {
    /// Retry on any error.
    #[default]
    Always,

    /// Retry only on transient errors (timeouts, resource unavailable).
    TransientOnly,

    /// Never retry, regardless of max_attempts.
    Never,
}

impl RetryPolicy {
    /// Create a policy that runs the task exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            retry_on: RetryCondition::Never,
        }
    }

    /// Create a policy with a fixed delay between attempts.
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts including the first
    /// * `delay` - Fixed delay between attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            retry_on: RetryCondition::Always,
        }
    }

    /// Create a policy whose delay doubles after every failed attempt.
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts including the first
    /// * `base_delay` - Delay before the first retry
    /// * `max_delay` - Cap on any single delay
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: 2.0,
            max_delay,
            retry_on: RetryCondition::Always,
        }
    }

    /// Builder: set the backoff multiplier (values below 1.0 are clamped).
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Builder: set the retry condition.
    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_on = condition;
        self
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1 && self.retry_on != RetryCondition::Never
    }

    /// Check if another attempt should follow a failure.
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts already made (including the failed one)
    /// * `error` - The error the last attempt returned
    pub fn should_retry(&self, attempts: u32, error: &TaskError) -> bool {
        if attempts >= self.max_attempts {
            return false;
        }
        match self.retry_on {
            RetryCondition::Always => true,
            RetryCondition::TransientOnly => error.is_transient(),
            RetryCondition::Never => false,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryPolicy {
    /// Default policy: no retries.
    fn default() -> Self {
        Self::none()
    }
}
