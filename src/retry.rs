//! Retry policy with capped exponential backoff.
//!
//! Transient failures (transport errors, timeouts, HTTP 429/5xx,
//! dispatcher backpressure) are retried with exponentially growing delays;
//! permanent failures stop immediately. Exhausting the retry budget yields
//! a terminal failure preserving the last error.

use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::error::GenerationError;

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again
    RetryAfter(Duration),
    /// Stop; the error is terminal
    GiveUp,
}

/// Per-request retry/backoff policy.
///
/// `max_retries` counts retries beyond the first attempt: with the default
/// of 3, a request makes at most 4 HTTP attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.max_retries, config.base_backoff, config.max_backoff)
    }

    /// Returns the delay before retry number `retry` (zero-based).
    ///
    /// Delay = base * 2^retry, capped at `max_delay`. The shift saturates
    /// so a pathological retry count cannot overflow.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let delay = self
            .base_delay
            .as_millis()
            .saturating_mul(factor as u128)
            .min(self.max_delay.as_millis());
        Duration::from_millis(delay as u64)
    }

    /// Decides whether to retry after a failure.
    ///
    /// `retries_used` is how many retries have already happened for this
    /// request (not counting the initial attempt).
    pub fn decide(&self, error: &GenerationError, retries_used: u32) -> RetryDecision {
        if !error.is_transient() || retries_used >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.backoff(retries_used))
    }

    /// The retry budget beyond the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(250), Duration::from_secs(8))
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = policy();
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        // Capped from here on
        assert_eq!(policy.backoff(5), Duration::from_secs(8));
        assert_eq!(policy.backoff(63), Duration::from_secs(8));
        assert_eq!(policy.backoff(200), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let policy = policy();
        let mut previous = Duration::ZERO;
        for retry in 0..20u32 {
            let delay = policy.backoff(retry);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(8));
            previous = delay;
        }
    }

    #[test]
    fn test_transient_errors_retry_until_budget_exhausted() {
        let policy = policy();
        let err = GenerationError::Provider {
            status: 429,
            message: "rate limited".into(),
        };

        assert_eq!(
            policy.decide(&err, 0),
            RetryDecision::RetryAfter(Duration::from_millis(250))
        );
        assert_eq!(
            policy.decide(&err, 2),
            RetryDecision::RetryAfter(Duration::from_millis(1000))
        );
        assert_eq!(policy.decide(&err, 3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(&err, 10), RetryDecision::GiveUp);
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let policy = policy();
        let bad_request = GenerationError::Provider {
            status: 400,
            message: "bad request".into(),
        };
        let malformed = GenerationError::MalformedResponse("no text field".into());

        assert_eq!(policy.decide(&bad_request, 0), RetryDecision::GiveUp);
        assert_eq!(policy.decide(&malformed, 0), RetryDecision::GiveUp);
    }

    #[test]
    fn test_backpressure_is_retryable() {
        let policy = policy();
        assert_eq!(
            policy.decide(&GenerationError::Backpressure, 1),
            RetryDecision::RetryAfter(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_zero_retry_budget() {
        let policy = RetryPolicy::new(0, Duration::from_millis(100), Duration::from_secs(1));
        let err = GenerationError::Transport("reset".into());
        assert_eq!(policy.decide(&err, 0), RetryDecision::GiveUp);
    }
}
