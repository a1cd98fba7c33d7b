//! Immediate re-invocation of the validator for retryable errors

use crate::config::DEFAULT_RETRY_LIMIT;
use crate::domain::ProcessOutcome;
use crate::error::ErrorClassification;

/// Final outcome plus how many extra attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted {
    pub outcome: ProcessOutcome,
    pub retries: u32,
}

/// Bounded, stateless retry without backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryController {
    max_attempts: u32,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_LIMIT)
    }
}

impl RetryController {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `attempt` (given the 1-based attempt number) until it stops
    /// failing with a retryable error or the ceiling is reached.
    pub fn run<F>(&self, mut attempt: F) -> Attempted
    where
        F: FnMut(u32) -> ProcessOutcome,
    {
        let mut number = 1;
        loop {
            let outcome = attempt(number);
            let retryable = matches!(
                &outcome,
                ProcessOutcome::Fail(err) if err.classification() == ErrorClassification::Retryable
            );
            if !retryable || number >= self.max_attempts {
                return Attempted {
                    outcome,
                    retries: number - 1,
                };
            }
            number += 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::domain::SkipSignal;
    use crate::error::RecordError;

    #[test]
    fn test_success_needs_no_retry() {
        let retry = RetryController::default();
        let result = retry.run(|_| ProcessOutcome::Skip(SkipSignal::BLANK_KEY));
        assert_eq!(result.retries, 0);
    }

    #[test]
    fn test_transient_recovers() {
        let retry = RetryController::new(3);
        let result = retry.run(|n| {
            if n < 3 {
                ProcessOutcome::Fail(RecordError::Transient("busy".into()))
            } else {
                ProcessOutcome::Skip(SkipSignal::BLANK_KEY)
            }
        });
        assert_eq!(result.retries, 2);
        assert_eq!(result.outcome, ProcessOutcome::Skip(SkipSignal::BLANK_KEY));
    }

    #[test]
    fn test_ceiling_hands_back_last_error() {
        let retry = RetryController::new(3);
        let mut calls = 0;
        let result = retry.run(|_| {
            calls += 1;
            ProcessOutcome::Fail(RecordError::Transient("busy".into()))
        });
        assert_eq!(calls, 3);
        assert_eq!(result.retries, 2);
        assert!(matches!(result.outcome, ProcessOutcome::Fail(RecordError::Transient(_))));
    }

    #[test]
    fn test_skippable_errors_are_not_retried() {
        let retry = RetryController::new(3);
        let mut calls = 0;
        retry.run(|_| {
            calls += 1;
            ProcessOutcome::Fail(RecordError::MissingField { field: "monto" })
        });
        assert_eq!(calls, 1);
    }
}
