//! Per-domain validation and transformation
//!
//! Each domain turns a typed row into a [`ProcessOutcome`]. Rules run in a
//! fixed order and the first failure wins:
//!
//! 1. required fields present
//! 2. values normalised (amounts, dates, trimming)
//! 3. enumerations resolved through synonym tables
//! 4. range and business rules
//! 5. derived values computed
//!
//! Implementations are pure: the same row and context always give the same
//! outcome, which is what makes retrying safe.

pub mod account;
pub mod annual;
pub mod entity;
pub mod transaction;

use chrono::NaiveDate;
use ledger_common::dates::{self, YearMonth};
use ledger_common::{money, LedgerError};
use regex::Regex;
use rust_decimal::Decimal;

use crate::error::RecordError;
use crate::mapper::MappedRow;

pub use account::{Account, AccountDomain, AccountRow, AccountType, InterestRateTable};
pub use annual::{AnnualDomain, AnnualRow, AnnualSummary, Movement};
pub use entity::{EntityKey, EntityKind, ValidatedEntity};
pub use transaction::{Anomaly, Transaction, TransactionCategory, TransactionDomain, TransactionRow};

/// Natural keys: upper-case letters, digits, `_` and `-`, at most 50 characters
pub const KEY_PATTERN: &str = r"^[A-Z0-9][A-Z0-9_-]{0,49}$";

/// Run-wide inputs to validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessContext {
    /// Reference day for every date rule in the run
    pub today: NaiveDate,
    /// Month stamped on interest postings
    pub as_of_month: YearMonth,
}

impl ProcessContext {
    pub fn new(today: NaiveDate, as_of_month: YearMonth) -> Self {
        Self { today, as_of_month }
    }

    /// Context for "now" in local time, posting to the current month
    pub fn today() -> Self {
        let today = chrono::Local::now().date_naive();
        Self::new(today, YearMonth::of(today))
    }
}

/// Record intentionally dropped without being an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipSignal {
    pub reason: &'static str,
}

impl SkipSignal {
    pub const BLANK_KEY: SkipSignal = SkipSignal { reason: "blank-key" };
}

/// Result of running a domain over one row
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Emit(ValidatedEntity),
    Skip(SkipSignal),
    Fail(RecordError),
}

impl From<Result<ValidatedEntity, RecordError>> for ProcessOutcome {
    fn from(result: Result<ValidatedEntity, RecordError>) -> Self {
        match result {
            Ok(entity) => ProcessOutcome::Emit(entity),
            Err(err) => ProcessOutcome::Fail(err),
        }
    }
}

/// A family of records sharing a file layout and a rule set
pub trait Domain: Send + Sync + 'static {
    type Row: MappedRow;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn process(&self, row: &Self::Row, ctx: &ProcessContext) -> ProcessOutcome;
}

/// Compiled natural-key format
#[derive(Debug, Clone)]
pub struct KeyFormat {
    pattern: Regex,
}

impl KeyFormat {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn standard() -> Result<Self, regex::Error> {
        Self::new(KEY_PATTERN)
    }

    /// The trimmed key, or `None` when it is blank and the record should be
    /// skipped silently.
    pub fn present(raw: Option<&str>) -> Option<&str> {
        raw.map(str::trim).filter(|k| !k.is_empty())
    }

    /// Upper-case a present key and match it against the format; a mismatch
    /// is a business rule violation described with `label`.
    pub fn check(&self, raw: &str, label: &str) -> Result<String, RecordError> {
        let key = raw.to_uppercase();
        if !self.pattern.is_match(&key) {
            return Err(RecordError::business(format!(
                "{label} '{raw}' has an invalid format"
            )));
        }
        Ok(key)
    }
}

pub(crate) fn require<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, RecordError> {
    value.as_deref().ok_or(RecordError::MissingField { field })
}

pub(crate) fn parse_money(raw: &str, field: &'static str) -> Result<Decimal, RecordError> {
    money::parse_amount(raw).map_err(|e| parse_failure(field, raw, e))
}

pub(crate) fn parse_day(raw: &str, field: &'static str) -> Result<NaiveDate, RecordError> {
    dates::parse_date(raw).map_err(|e| parse_failure(field, raw, e))
}

fn parse_failure(field: &'static str, raw: &str, err: LedgerError) -> RecordError {
    RecordError::ParseFailure {
        field,
        value: raw.to_string(),
        reason: err.to_string(),
    }
}

/// Lower-case and strip accents so synonym tables match "Crédito" and "credito" alike.
pub(crate) fn fold(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            other => other,
        })
        .collect()
}
