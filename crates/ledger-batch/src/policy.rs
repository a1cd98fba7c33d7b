//! Skip policy and skip budget
//!
//! Every record error ends up here once retries are spent. Fatal errors stop
//! the job outright; everything else is dropped and charged to the job's
//! [`SkipBudget`] until the budget runs out.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::error::{ErrorClassification, RecordError};

pub const REASON_MALFORMED: &str = "malformed-record";
pub const REASON_MISSING_FIELD: &str = "missing-field";
pub const REASON_PARSE: &str = "parse-failure";
pub const REASON_ENUMERATION: &str = "invalid-enumeration";
pub const REASON_AMOUNT: &str = "amount-validation";
pub const REASON_ACCOUNT: &str = "account-validation";
pub const REASON_GENERIC: &str = "generic";

/// The budget had no room left for another skip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("skip limit of {limit} exceeded")]
pub struct SkipLimitExceeded {
    pub limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipPolicy {
    limit: u64,
}

impl SkipPolicy {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    /// Classify `error` given the skips already charged to the job.
    ///
    /// A skippable error becomes fatal once the budget is spent.
    pub fn classify(&self, error: &RecordError, skip_count: u64) -> ErrorClassification {
        match error.classification() {
            ErrorClassification::Fatal => ErrorClassification::Fatal,
            ErrorClassification::Retryable => ErrorClassification::Retryable,
            ErrorClassification::Skippable if skip_count >= self.limit => ErrorClassification::Fatal,
            ErrorClassification::Skippable => ErrorClassification::Skippable,
        }
    }

    /// Decide whether the record behind `error` may be dropped.
    ///
    /// `Ok(false)` for inherently fatal errors. A retryable error that
    /// reaches this point has exhausted its attempts and is treated as
    /// skippable.
    pub fn should_skip(&self, error: &RecordError, skip_count: u64) -> Result<bool, SkipLimitExceeded> {
        if error.classification() == ErrorClassification::Fatal {
            return Ok(false);
        }
        if skip_count >= self.limit {
            return Err(SkipLimitExceeded { limit: self.limit });
        }
        Ok(true)
    }

    /// Tag used to tally skips in the report.
    pub fn reason(&self, error: &RecordError) -> &'static str {
        match error {
            RecordError::MalformedRecord { .. } | RecordError::SchemaMismatch { .. } => REASON_MALFORMED,
            RecordError::MissingField { .. } => REASON_MISSING_FIELD,
            RecordError::ParseFailure { .. } => REASON_PARSE,
            RecordError::InvalidEnumeration { .. } => REASON_ENUMERATION,
            RecordError::BusinessRuleViolation(message) => business_reason(message),
            _ => REASON_GENERIC,
        }
    }
}

fn business_reason(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("balance") || lower.contains("amount") {
        REASON_AMOUNT
    } else if lower.contains("account") || message.contains("ID") {
        REASON_ACCOUNT
    } else {
        REASON_GENERIC
    }
}

/// Skips charged to one job, shared by everything that reports a skip
#[derive(Debug)]
pub struct SkipBudget {
    limit: u64,
    used: AtomicU64,
}

impl SkipBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    /// Charge one skip, failing without charging when the budget is spent.
    pub fn charge(&self) -> Result<u64, SkipLimitExceeded> {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|_| SkipLimitExceeded { limit: self.limit })
    }
}
