//! Annual account statements
//!
//! Input layout (`cuentas_anuales.csv`): `cuenta_id,fecha,transaccion,monto,descripcion`.
//! One statement per account and calendar year.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use ledger_common::money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::entity::ValidatedEntity;
use super::{fold, parse_day, parse_money, require, Domain, KeyFormat, ProcessContext, ProcessOutcome, SkipSignal};
use crate::error::RecordError;
use crate::mapper::{BoundFields, MappedRow};

pub const FIRST_STATEMENT_YEAR: i32 = 2020;
pub const MAX_DESCRIPTION_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnualRow {
    pub account_number: Option<String>,
    pub date: Option<String>,
    pub movement: Option<String>,
    pub amount: Option<String>,
    pub description: Option<String>,
}

impl MappedRow for AnnualRow {
    const COLUMNS: &'static [&'static str] = &["cuenta_id", "fecha", "transaccion", "monto", "descripcion"];

    fn from_fields(fields: &BoundFields<'_>) -> Self {
        Self {
            account_number: fields.owned("cuenta_id"),
            date: fields.owned("fecha"),
            movement: fields.owned("transaccion"),
            amount: fields.owned("monto"),
            description: fields.owned("descripcion"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Movement {
    Deposit,
    Withdrawal,
}

impl Movement {
    pub fn from_synonym(raw: &str) -> Option<Self> {
        match fold(raw).as_str() {
            "deposito" | "deposit" | "compra" | "abono" => Some(Movement::Deposit),
            "retiro" | "withdrawal" | "pago" | "cargo" => Some(Movement::Withdrawal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Movement::Deposit => "deposit",
            Movement::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnualSummary {
    pub account_number: String,
    pub year: i32,
    pub deposits: Decimal,
    pub withdrawals: Decimal,
    pub opening_balance: Decimal,
    pub closing_balance: Decimal,
    pub audit_date: NaiveDate,
    /// Set when a movement exceeds the audit threshold
    pub needs_review: bool,
    pub last_movement: Movement,
    pub description: Option<String>,
}

impl AnnualSummary {
    /// The latest statement for an account-year replaces the stored one, so
    /// reloading a file leaves the table unchanged.
    pub fn merged_with(&self, incoming: &AnnualSummary) -> AnnualSummary {
        AnnualSummary {
            account_number: self.account_number.clone(),
            year: self.year,
            ..incoming.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnualDomain {
    keys: KeyFormat,
    max_abs_amount: Decimal,
    audit_threshold: Decimal,
}

impl AnnualDomain {
    pub fn new(keys: KeyFormat) -> Self {
        Self {
            keys,
            max_abs_amount: Decimal::from(1_000_000),
            audit_threshold: Decimal::from(100_000),
        }
    }

    pub fn standard() -> Result<Self, regex::Error> {
        Ok(Self::new(KeyFormat::standard()?))
    }

    fn validate(&self, raw_key: &str, row: &AnnualRow, ctx: &ProcessContext) -> Result<AnnualSummary, RecordError> {
        let raw_date = require(&row.date, "fecha")?;
        let raw_amount = require(&row.amount, "monto")?;
        let raw_movement = require(&row.movement, "transaccion")?;

        let date = parse_day(raw_date, "fecha")?;
        let amount = parse_money(raw_amount, "monto")?;
        let description = row
            .description
            .as_deref()
            .map(|d| d.chars().take(MAX_DESCRIPTION_LEN).collect::<String>());

        let movement = Movement::from_synonym(raw_movement).ok_or_else(|| RecordError::InvalidEnumeration {
            field: "transaccion",
            value: raw_movement.to_string(),
        })?;

        let account_number = self.keys.check(raw_key, "account number")?;
        let year = date.year();
        let current_year = ctx.today.year();
        if !(FIRST_STATEMENT_YEAR..=current_year).contains(&year) {
            return Err(RecordError::business(format!(
                "statement year {year} for account {account_number} outside [{FIRST_STATEMENT_YEAR}, {current_year}]"
            )));
        }
        if amount.abs() > self.max_abs_amount {
            return Err(RecordError::business(format!(
                "amount {amount} exceeds the limit of {}",
                self.max_abs_amount
            )));
        }

        let magnitude = amount.abs();
        let (deposits, withdrawals) = match movement {
            Movement::Deposit => (magnitude, Decimal::ZERO),
            Movement::Withdrawal => (Decimal::ZERO, magnitude),
        };
        let opening_balance = money::round_money(Decimal::ZERO);

        Ok(AnnualSummary {
            account_number,
            year,
            deposits: money::round_money(deposits),
            withdrawals: money::round_money(withdrawals),
            closing_balance: money::round_money(opening_balance + deposits - withdrawals),
            opening_balance,
            audit_date: ctx.today,
            needs_review: magnitude > self.audit_threshold,
            last_movement: movement,
            description,
        })
    }
}

impl Domain for AnnualDomain {
    type Row = AnnualRow;

    fn name(&self) -> &'static str {
        "annual"
    }

    fn process(&self, row: &AnnualRow, ctx: &ProcessContext) -> ProcessOutcome {
        let Some(raw_key) = KeyFormat::present(row.account_number.as_deref()) else {
            return ProcessOutcome::Skip(SkipSignal::BLANK_KEY);
        };

        self.validate(raw_key, row, ctx)
            .map(ValidatedEntity::AnnualSummary)
            .into()
    }
}
