//! Retry decisions for task invocations.
//!
//! Stateless: all logic lives in associated functions that take the route's
//! `RetryPolicy` as a parameter. The invoker registry drives the loop; the
//! interpreter never sees individual attempts.

use std::time::Duration;

use waypoint_types::config::{RetryOn, RetryPolicy};

use super::invoker::InvocationError;

/// Stateless retry handler for failed invocations.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt should be made after `attempt` (1-based)
    /// failed with `error`.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32, error: &InvocationError) -> bool {
        attempt < policy.max_attempts && Self::is_retryable(policy, error)
    }

    /// Whether the policy opts into this class of failure at all.
    pub fn is_retryable(policy: &RetryPolicy, error: &InvocationError) -> bool {
        let class = match error {
            InvocationError::Transport { .. } => RetryOn::Transport,
            InvocationError::FunctionError { .. } => RetryOn::FunctionError,
            InvocationError::Throttled { .. } => RetryOn::Throttled,
            // Routing and payload errors fail the same way on every attempt.
            InvocationError::NoInvokerForResource(_)
            | InvocationError::InvalidResponse { .. }
            | InvocationError::Rejected { .. } => return false,
        };
        policy
            .retry_on
            .iter()
            .any(|on| *on == RetryOn::All || *on == class)
    }

    /// Delay before the attempt following `attempt` (1-based):
    /// `interval_ms * backoff_rate^(attempt - 1)`, capped at
    /// `max_interval_ms` when set.
    pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = policy.interval_ms as f64 * policy.backoff_rate.powi(exponent);
        let capped = match policy.max_interval_ms {
            Some(max) => millis.min(max as f64),
            None => millis,
        };
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_millis(capped.min(u64::MAX as f64) as u64)
        } else {
            Duration::from_millis(policy.max_interval_ms.unwrap_or(u64::MAX))
        }
    }
}
