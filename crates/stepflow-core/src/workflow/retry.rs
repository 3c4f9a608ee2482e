//! Attempt accounting and retry backoff.
//!
//! Stateless: everything is derived from the execution row. An execution
//! starts with `remaining_attempts == max_attempts`; every failed attempt
//! consumes one. A failure that leaves attempts remaining is rescheduled
//! after an exponential backoff, the last one is final.

use std::time::Duration;

use chrono::{DateTime, Utc};
use stepflow_types::execution::WorkflowExecution;

/// Exponent cap so the backoff multiplier cannot overflow.
const MAX_BACKOFF_EXPONENT: u32 = 20;

// ---------------------------------------------------------------------------
// RetryDecision
// ---------------------------------------------------------------------------

/// What to persist after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Become eligible again at `at`.
    Retry { at: DateTime<Utc> },
    /// No attempts left.
    Final,
}

impl RetryDecision {
    /// The `next_retry_at` column value.
    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RetryDecision::Retry { at } => Some(*at),
            RetryDecision::Final => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

pub struct RetryHandler;

impl RetryHandler {
    /// Whether a failure that leaves `remaining_after_failure` attempts
    /// should be retried.
    pub fn should_retry(remaining_after_failure: u32) -> bool {
        remaining_after_failure > 0
    }

    /// Delay before the next attempt: `base * 2^attempts_used`.
    pub fn backoff(base: Duration, attempts_used: u32) -> Duration {
        let factor = 1u32 << attempts_used.min(MAX_BACKOFF_EXPONENT);
        base.saturating_mul(factor)
    }

    /// Decide the fate of `execution` whose current attempt just failed at
    /// `now`. `execution` is the row as leased, before the attempt is
    /// consumed.
    pub fn decide(execution: &WorkflowExecution, now: DateTime<Utc>) -> RetryDecision {
        let remaining = execution.remaining_attempts.saturating_sub(1);
        if !Self::should_retry(remaining) {
            return RetryDecision::Final;
        }
        let attempts_used = execution.max_attempts.saturating_sub(remaining);
        let delay = Self::backoff(Duration::from_millis(execution.retry_backoff_ms), attempts_used);
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        match now.checked_add_signed(delay) {
            Some(at) => RetryDecision::Retry { at },
            None => RetryDecision::Final,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_types::execution::ExecutionStatus;
    use uuid::Uuid;

    fn execution(max: u32, remaining: u32) -> WorkflowExecution {
        WorkflowExecution {
            id: Uuid::now_v7(),
            workflow_name: "ship-order".to_string(),
            namespace: "default".to_string(),
            status: ExecutionStatus::Running,
            input_data: b"null".to_vec(),
            output_data: None,
            max_attempts: max,
            remaining_attempts: remaining,
            next_retry_at: None,
            sleep_until: None,
            timeout_ms: 60_000,
            retry_backoff_ms: 1_000,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(RetryHandler::backoff(base, 1), Duration::from_secs(2));
        assert_eq!(RetryHandler::backoff(base, 2), Duration::from_secs(4));
        assert_eq!(RetryHandler::backoff(base, 3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_exponent_is_capped() {
        let base = Duration::from_millis(1);
        assert_eq!(
            RetryHandler::backoff(base, 64),
            RetryHandler::backoff(base, MAX_BACKOFF_EXPONENT)
        );
        // Saturates instead of overflowing.
        assert_eq!(RetryHandler::backoff(Duration::MAX, 5), Duration::MAX);
    }

    #[test]
    fn test_three_attempts_give_two_retries() {
        let now = Utc::now();

        let first = RetryHandler::decide(&execution(3, 3), now);
        assert_eq!(first, RetryDecision::Retry { at: now + chrono::Duration::seconds(2) });

        let second = RetryHandler::decide(&execution(3, 2), now);
        assert_eq!(second, RetryDecision::Retry { at: now + chrono::Duration::seconds(4) });

        assert_eq!(RetryHandler::decide(&execution(3, 1), now), RetryDecision::Final);
    }

    #[test]
    fn test_single_attempt_is_final_immediately() {
        let decision = RetryHandler::decide(&execution(1, 1), Utc::now());
        assert_eq!(decision, RetryDecision::Final);
        assert_eq!(decision.next_retry_at(), None);
    }

    #[test]
    fn test_should_retry_boundary() {
        assert!(RetryHandler::should_retry(1));
        assert!(!RetryHandler::should_retry(0));
    }
}
