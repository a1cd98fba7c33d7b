//! Daily transactions and anomaly flagging
//!
//! Input layout (`transacciones.csv`): `id,fecha,monto,tipo`.
//! Anomalies never reject a transaction; they travel with the stored row.

use std::fmt;

use chrono::{Datelike, Days, NaiveDate};
use ledger_common::dates;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::entity::ValidatedEntity;
use super::{fold, parse_day, parse_money, require, Domain, KeyFormat, ProcessContext, ProcessOutcome, SkipSignal};
use crate::error::RecordError;
use crate::mapper::{BoundFields, MappedRow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRow {
    pub transaction_id: Option<String>,
    pub date: Option<String>,
    pub amount: Option<String>,
    pub category: Option<String>,
}

impl MappedRow for TransactionRow {
    const COLUMNS: &'static [&'static str] = &["id", "fecha", "monto", "tipo"];

    fn from_fields(fields: &BoundFields<'_>) -> Self {
        Self {
            transaction_id: fields.owned("id"),
            date: fields.owned("fecha"),
            amount: fields.owned("monto"),
            category: fields.owned("tipo"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionCategory {
    Credit,
    Debit,
}

impl TransactionCategory {
    pub fn from_synonym(raw: &str) -> Option<Self> {
        match fold(raw).as_str() {
            "credito" | "credit" | "deposito" | "abono" => Some(TransactionCategory::Credit),
            "debito" | "debit" | "retiro" | "cargo" | "pago" => Some(TransactionCategory::Debit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionCategory::Credit => "credit",
            TransactionCategory::Debit => "debit",
        }
    }
}

impl fmt::Display for TransactionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anomaly {
    /// Absolute amount above the review threshold
    HighAmount,
    ZeroAmount,
    /// Dated after the run day (tomorrow is still accepted)
    FutureDate,
    /// Dated before the floor year
    BeforeFloorYear,
    /// Large amount that is an exact multiple of the rounding unit
    RoundAmount,
}

impl Anomaly {
    pub fn as_str(&self) -> &'static str {
        match self {
            Anomaly::HighAmount => "high_amount",
            Anomaly::ZeroAmount => "zero_amount",
            Anomaly::FutureDate => "future_date",
            Anomaly::BeforeFloorYear => "before_floor_year",
            Anomaly::RoundAmount => "round_amount",
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub booked_on: NaiveDate,
    pub amount: Decimal,
    pub category: TransactionCategory,
    pub description: String,
    pub anomalies: Vec<Anomaly>,
}

impl Transaction {
    pub fn merged_with(&self, incoming: &Transaction) -> Transaction {
        Transaction {
            transaction_id: self.transaction_id.clone(),
            ..incoming.clone()
        }
    }
}

/// Limits and thresholds for transaction validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRules {
    pub max_abs_amount: Decimal,
    pub review_threshold: Decimal,
    pub round_unit: Decimal,
    pub floor_year: i32,
    pub history_years: u32,
}

impl Default for TransactionRules {
    fn default() -> Self {
        Self {
            max_abs_amount: Decimal::from(1_000_000),
            review_threshold: Decimal::from(50_000),
            round_unit: Decimal::from(10_000),
            floor_year: 2020,
            history_years: 50,
        }
    }
}

impl TransactionRules {
    fn anomalies(&self, amount: Decimal, booked_on: NaiveDate, today: NaiveDate) -> Vec<Anomaly> {
        let magnitude = amount.abs();
        let mut found = Vec::new();

        if magnitude > self.review_threshold {
            found.push(Anomaly::HighAmount);
        }
        if amount.is_zero() {
            found.push(Anomaly::ZeroAmount);
        }
        if booked_on > today {
            found.push(Anomaly::FutureDate);
        }
        if booked_on.year() < self.floor_year {
            found.push(Anomaly::BeforeFloorYear);
        }
        if magnitude >= self.round_unit && (magnitude % self.round_unit).is_zero() {
            found.push(Anomaly::RoundAmount);
        }

        found
    }
}

#[derive(Debug, Clone)]
pub struct TransactionDomain {
    keys: KeyFormat,
    rules: TransactionRules,
}

impl TransactionDomain {
    pub fn new(keys: KeyFormat, rules: TransactionRules) -> Self {
        Self { keys, rules }
    }

    pub fn standard() -> Result<Self, regex::Error> {
        Ok(Self::new(KeyFormat::standard()?, TransactionRules::default()))
    }

    fn validate(&self, raw_key: &str, row: &TransactionRow, ctx: &ProcessContext) -> Result<Transaction, RecordError> {
        let raw_date = require(&row.date, "fecha")?;
        let raw_amount = require(&row.amount, "monto")?;
        let raw_category = require(&row.category, "tipo")?;

        let booked_on = parse_day(raw_date, "fecha")?;
        let amount = parse_money(raw_amount, "monto")?;

        let category = TransactionCategory::from_synonym(raw_category).ok_or_else(|| {
            RecordError::InvalidEnumeration {
                field: "tipo",
                value: raw_category.to_string(),
            }
        })?;

        let transaction_id = self.keys.check(raw_key, "transaction ID")?;
        if amount.abs() > self.rules.max_abs_amount {
            return Err(RecordError::business(format!(
                "amount {amount} exceeds the limit of {}",
                self.rules.max_abs_amount
            )));
        }

        let earliest = dates::years_before(ctx.today, self.rules.history_years)
            .map_err(|e| RecordError::business(format!("transaction date window: {e}")))?;
        let latest = ctx
            .today
            .checked_add_days(Days::new(1))
            .unwrap_or(ctx.today);
        if booked_on < earliest || booked_on > latest {
            return Err(RecordError::business(format!(
                "transaction date {booked_on} outside [{earliest}, {latest}]"
            )));
        }

        Ok(Transaction {
            description: format!("{category} of {}", amount.abs()),
            anomalies: self.rules.anomalies(amount, booked_on, ctx.today),
            transaction_id,
            booked_on,
            amount,
            category,
        })
    }
}

impl Domain for TransactionDomain {
    type Row = TransactionRow;

    fn name(&self) -> &'static str {
        "transactions"
    }

    fn process(&self, row: &TransactionRow, ctx: &ProcessContext) -> ProcessOutcome {
        let Some(raw_key) = KeyFormat::present(row.transaction_id.as_deref()) else {
            return ProcessOutcome::Skip(SkipSignal::BLANK_KEY);
        };

        self.validate(raw_key, row, ctx)
            .map(ValidatedEntity::Transaction)
            .into()
    }
}
