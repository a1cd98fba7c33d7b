//! Error types for the shared value helpers

use thiserror::Error;

/// Result type alias for ledger helpers
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised while normalising raw field values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("empty value")]
    Empty,

    #[error("invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },

    #[error("unrecognised date '{0}'")]
    InvalidDate(String),

    #[error("invalid period '{0}', expected YYYY-MM")]
    InvalidPeriod(String),

    #[error("date arithmetic out of range")]
    DateOutOfRange,
}
