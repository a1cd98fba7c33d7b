//! Error taxonomy for the batch pipeline
//!
//! Three layers:
//! - [`RecordError`]: something wrong with one input record; never escapes a job
//! - [`StoreError`]: the persistence layer refused a lookup, write or commit
//! - [`PipelineError`]: the job itself cannot continue

use std::time::Duration;

use thiserror::Error;

/// How the skip policy treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Abort the job immediately
    Fatal,
    /// Re-run the validator before giving up on the record
    Retryable,
    /// Drop the record and charge the skip budget
    Skippable,
}

/// Failure attached to a single input record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },

    #[error("schema mismatch at line {line}: expected {expected} fields, found {found}")]
    SchemaMismatch {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("cannot parse {field} '{value}': {reason}")]
    ParseFailure {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid {field} '{value}'")]
    InvalidEnumeration { field: &'static str, value: String },

    #[error("{0}")]
    BusinessRuleViolation(String),

    /// A collaborator was briefly unavailable; the same input may succeed later
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl RecordError {
    /// Classification that depends only on the kind of error.
    pub fn classification(&self) -> ErrorClassification {
        match self {
            RecordError::SchemaMismatch { .. }
            | RecordError::ResourceUnavailable(_)
            | RecordError::ResourceExhausted(_) => ErrorClassification::Fatal,
            RecordError::Transient(_) => ErrorClassification::Retryable,
            RecordError::MalformedRecord { .. }
            | RecordError::MissingField { .. }
            | RecordError::ParseFailure { .. }
            | RecordError::InvalidEnumeration { .. }
            | RecordError::BusinessRuleViolation(_) => ErrorClassification::Skippable,
        }
    }

    pub fn business(message: impl Into<String>) -> Self {
        RecordError::BusinessRuleViolation(message.into())
    }
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lookup failed for {key}: {message}")]
    Lookup { key: String, message: String },

    #[error("write failed for {key}: {message}")]
    Write { key: String, message: String },

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("stored row is invalid: {0}")]
    Decode(String),

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Job-level failures; any of these ends the job as failed
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source unavailable: {path}: {reason}")]
    SourceUnavailable { path: String, reason: String },

    #[error("schema mismatch on first record (line {line}): expected {expected} fields, found {found}")]
    SchemaMismatch {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("skip limit of {limit} exceeded at line {line}: {cause}")]
    SkipBudgetExceeded {
        limit: u64,
        line: u64,
        cause: RecordError,
    },

    #[error("fatal record error at line {line}: {cause}")]
    FatalRecord { line: u64, cause: RecordError },

    #[error("chunk {chunk} failed to commit after {attempts} attempt(s): {source}")]
    ChunkCommitFailure {
        chunk: u64,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("workers did not drain within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("invalid run parameters: {0}")]
    InvalidParameters(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    /// Convert a fatal record error into the job-level error it stands for.
    pub fn from_fatal_record(line: u64, cause: RecordError) -> Self {
        match cause {
            RecordError::SchemaMismatch {
                line,
                expected,
                found,
            } => PipelineError::SchemaMismatch {
                line,
                expected,
                found,
            },
            cause => PipelineError::FatalRecord { line, cause },
        }
    }
}
