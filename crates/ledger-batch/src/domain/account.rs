//! Accounts and the monthly interest posting
//!
//! Input layout (`intereses.csv`): `cuenta_id,nombre,saldo,edad,tipo`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ledger_common::dates::YearMonth;
use ledger_common::money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::entity::ValidatedEntity;
use super::{fold, parse_money, require, Domain, KeyFormat, ProcessContext, ProcessOutcome, SkipSignal};
use crate::error::RecordError;
use crate::mapper::{BoundFields, MappedRow};

pub const MIN_BALANCE: Decimal = Decimal::from_parts(10_000_000, 0, 0, true, 2);
pub const MAX_BALANCE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 2);
pub const MAX_AGE: u16 = 150;
pub const MAX_OWNER_NAME_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRow {
    pub account_number: Option<String>,
    pub owner_name: Option<String>,
    pub balance: Option<String>,
    pub age: Option<String>,
    pub account_type: Option<String>,
}

impl MappedRow for AccountRow {
    const COLUMNS: &'static [&'static str] = &["cuenta_id", "nombre", "saldo", "edad", "tipo"];

    fn from_fields(fields: &BoundFields<'_>) -> Self {
        Self {
            account_number: fields.owned("cuenta_id"),
            owner_name: fields.owned("nombre"),
            balance: fields.owned("saldo"),
            age: fields.owned("edad"),
            account_type: fields.owned("tipo"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Savings,
    Checking,
    Business,
    Credit,
}

impl AccountType {
    /// Resolve a free-text account type through the synonym table.
    pub fn from_synonym(raw: &str) -> Option<Self> {
        match fold(raw).as_str() {
            "savings" | "saving" | "ahorro" | "ahorros" => Some(AccountType::Savings),
            "checking" | "corriente" => Some(AccountType::Checking),
            "business" | "empresarial" | "negocio" => Some(AccountType::Business),
            "credit" | "credito" | "prestamo" => Some(AccountType::Credit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Savings => "savings",
            AccountType::Checking => "checking",
            AccountType::Business => "business",
            AccountType::Credit => "credit",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_synonym(s).ok_or_else(|| format!("unknown account type '{s}'"))
    }
}

/// Annual interest rate per account type; absent types earn nothing
#[derive(Debug, Clone, PartialEq)]
pub struct InterestRateTable {
    rates: HashMap<AccountType, Decimal>,
}

impl Default for InterestRateTable {
    fn default() -> Self {
        Self::empty()
            .with_rate(AccountType::Savings, Decimal::new(25, 3))
            .with_rate(AccountType::Checking, Decimal::new(1, 2))
            .with_rate(AccountType::Business, Decimal::new(35, 3))
    }
}

impl InterestRateTable {
    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, account_type: AccountType, annual_rate: Decimal) -> Self {
        self.rates.insert(account_type, annual_rate);
        self
    }

    pub fn rate_for(&self, account_type: AccountType) -> Decimal {
        self.rates.get(&account_type).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Account after the month's interest has been posted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_number: String,
    pub owner_name: String,
    pub account_type: AccountType,
    /// Balance including `interest`
    pub balance: Decimal,
    pub interest: Decimal,
    pub age: Option<u16>,
    pub as_of_month: YearMonth,
}

impl Account {
    /// Every mutable attribute follows the incoming posting.
    pub fn merged_with(&self, incoming: &Account) -> Account {
        Account {
            account_number: self.account_number.clone(),
            owner_name: incoming.owner_name.clone(),
            account_type: incoming.account_type,
            balance: incoming.balance,
            interest: incoming.interest,
            age: incoming.age.or(self.age),
            as_of_month: incoming.as_of_month,
        }
    }
}

/// Validation and interest calculation for account rows
#[derive(Debug, Clone)]
pub struct AccountDomain {
    keys: KeyFormat,
    rates: InterestRateTable,
}

impl AccountDomain {
    pub fn new(keys: KeyFormat, rates: InterestRateTable) -> Self {
        Self { keys, rates }
    }

    pub fn standard() -> Result<Self, regex::Error> {
        Ok(Self::new(KeyFormat::standard()?, InterestRateTable::default()))
    }

    fn validate(&self, raw_key: &str, row: &AccountRow, ctx: &ProcessContext) -> Result<Account, RecordError> {
        let raw_balance = require(&row.balance, "saldo")?;
        let raw_type = require(&row.account_type, "tipo")?;
        let owner_name = require(&row.owner_name, "nombre")?;

        let balance = parse_money(raw_balance, "saldo")?;
        let age = row
            .age
            .as_deref()
            .map(|raw| {
                raw.parse::<u16>().map_err(|e| RecordError::ParseFailure {
                    field: "edad",
                    value: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let account_type = AccountType::from_synonym(raw_type).ok_or_else(|| RecordError::InvalidEnumeration {
            field: "tipo",
            value: raw_type.to_string(),
        })?;

        let account_number = self.keys.check(raw_key, "account number")?;
        if balance < MIN_BALANCE || balance > MAX_BALANCE {
            return Err(RecordError::business(format!(
                "balance {balance} outside allowed range [{MIN_BALANCE}, {MAX_BALANCE}]"
            )));
        }
        if let Some(age) = age.filter(|a| *a > MAX_AGE) {
            return Err(RecordError::business(format!(
                "account holder age {age} outside 0..={MAX_AGE}"
            )));
        }
        if owner_name.chars().count() > MAX_OWNER_NAME_LEN {
            return Err(RecordError::business(format!(
                "owner name for account {account_number} longer than {MAX_OWNER_NAME_LEN} characters"
            )));
        }

        let interest = money::monthly_interest(balance, self.rates.rate_for(account_type));

        Ok(Account {
            account_number,
            owner_name: owner_name.to_string(),
            account_type,
            balance: money::round_money(balance + interest),
            interest,
            age,
            as_of_month: ctx.as_of_month,
        })
    }
}

impl Domain for AccountDomain {
    type Row = AccountRow;

    fn name(&self) -> &'static str {
        "accounts"
    }

    fn process(&self, row: &AccountRow, ctx: &ProcessContext) -> ProcessOutcome {
        let Some(raw_key) = KeyFormat::present(row.account_number.as_deref()) else {
            return ProcessOutcome::Skip(SkipSignal::BLANK_KEY);
        };

        self.validate(raw_key, row, ctx)
            .map(ValidatedEntity::Account)
            .into()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ctx() -> ProcessContext {
        ProcessContext::new(
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            "2025-03".parse().unwrap(),
        )
    }

    fn row(fields: [&str; 5]) -> AccountRow {
        let opt = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());
        AccountRow {
            account_number: opt(fields[0]),
            owner_name: opt(fields[1]),
            balance: opt(fields[2]),
            age: opt(fields[3]),
            account_type: opt(fields[4]),
        }
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn emit(outcome: ProcessOutcome) -> Account {
        match outcome {
            ProcessOutcome::Emit(ValidatedEntity::Account(a)) => a,
            other => panic!("expected an account, got {other:?}"),
        }
    }

    fn fail(outcome: ProcessOutcome) -> RecordError {
        match outcome {
            ProcessOutcome::Fail(err) => err,
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn test_savings_interest_posting() {
        let domain = AccountDomain::standard().unwrap();
        let account = emit(domain.process(&row(["101", "Ana", "1000.00", "30", "savings"]), &ctx()));

        assert_eq!(account.account_number, "101");
        assert_eq!(account.interest, dec("2.08"));
        assert_eq!(account.balance, dec("1002.08"));
        assert_eq!(account.balance.scale(), 2);
        assert_eq!(account.age, Some(30));
        assert_eq!(account.as_of_month.to_string(), "2025-03");
    }

    #[test]
    fn test_synonyms_and_rates() {
        let domain = AccountDomain::standard().unwrap();

        let checking = emit(domain.process(&row(["c-9", "Luis", "$1,200.00", "", "Corriente"]), &ctx()));
        assert_eq!(checking.account_number, "C-9");
        assert_eq!(checking.account_type, AccountType::Checking);
        assert_eq!(checking.interest, dec("1.00"));
        assert_eq!(checking.age, None);

        let business = emit(domain.process(&row(["B1", "Acme", "12000", "40", "empresarial"]), &ctx()));
        assert_eq!(business.interest, dec("35.00"));

        let credit = emit(domain.process(&row(["L1", "Eva", "5000", "50", "préstamo"]), &ctx()));
        assert_eq!(credit.account_type, AccountType::Credit);
        assert_eq!(credit.interest, dec("0.00"));
        assert_eq!(credit.balance, dec("5000.00"));
    }

    #[test]
    fn test_negative_balance_earns_nothing() {
        let domain = AccountDomain::standard().unwrap();
        let account = emit(domain.process(&row(["101", "Ana", "-250.50", "30", "ahorro"]), &ctx()));
        assert_eq!(account.interest, dec("0.00"));
        assert_eq!(account.balance, dec("-250.50"));
    }

    #[test]
    fn test_blank_key_is_skip_signal() {
        let domain = AccountDomain::standard().unwrap();
        let outcome = domain.process(&row(["  ", "Ana", "1000", "30", "savings"]), &ctx());
        assert_eq!(outcome, ProcessOutcome::Skip(SkipSignal::BLANK_KEY));
    }

    #[test]
    fn test_rule_order() {
        let domain = AccountDomain::standard().unwrap();

        let missing = fail(domain.process(&row(["1", "Ana", "", "30", "bogus"]), &ctx()));
        assert_eq!(missing, RecordError::MissingField { field: "saldo" });

        let parse = fail(domain.process(&row(["1", "Ana", "12x", "30", "bogus"]), &ctx()));
        assert!(matches!(parse, RecordError::ParseFailure { field: "saldo", .. }));

        let enumeration = fail(domain.process(&row(["1", "Ana", "20000000", "30", "bogus"]), &ctx()));
        assert!(matches!(enumeration, RecordError::InvalidEnumeration { field: "tipo", .. }));

        let range = fail(domain.process(&row(["1", "Ana", "20000000", "30", "savings"]), &ctx()));
        assert!(matches!(range, RecordError::BusinessRuleViolation(ref m) if m.contains("balance")));

        let bad_key_missing_balance = fail(domain.process(&row(["acc 1", "Ana", "", "30", "savings"]), &ctx()));
        assert_eq!(bad_key_missing_balance, RecordError::MissingField { field: "saldo" });

        let bad_key = fail(domain.process(&row(["acc 1", "Ana", "10", "30", "savings"]), &ctx()));
        assert!(matches!(bad_key, RecordError::BusinessRuleViolation(ref m) if m.contains("invalid format")));
    }

    #[test]
    fn test_age_limits() {
        let domain = AccountDomain::standard().unwrap();
        let too_old = fail(domain.process(&row(["1", "Ana", "10", "151", "savings"]), &ctx()));
        assert!(matches!(too_old, RecordError::BusinessRuleViolation(_)));

        let not_a_number = fail(domain.process(&row(["1", "Ana", "10", "-3", "savings"]), &ctx()));
        assert!(matches!(not_a_number, RecordError::ParseFailure { field: "edad", .. }));

        assert!(matches!(
            domain.process(&row(["1", "Ana", "10", "150", "savings"]), &ctx()),
            ProcessOutcome::Emit(_)
        ));
    }

    #[test]
    fn test_balance_bounds_are_inclusive() {
        let domain = AccountDomain::standard().unwrap();
        assert!(matches!(
            domain.process(&row(["1", "Ana", "10000000.00", "", "credit"]), &ctx()),
            ProcessOutcome::Emit(_)
        ));
        assert!(matches!(
            domain.process(&row(["1", "Ana", "-100000.00", "", "credit"]), &ctx()),
            ProcessOutcome::Emit(_)
        ));
        assert!(matches!(
            domain.process(&row(["1", "Ana", "-100000.01", "", "credit"]), &ctx()),
            ProcessOutcome::Fail(_)
        ));
    }

    #[test]
    fn test_custom_rate_table() {
        let rates = InterestRateTable::empty().with_rate(AccountType::Credit, dec("0.12"));
        let domain = AccountDomain::new(KeyFormat::standard().unwrap(), rates);
        let account = emit(domain.process(&row(["1", "Ana", "1000", "", "credito"]), &ctx()));
        assert_eq!(account.interest, dec("10.00"));

        let savings = emit(domain.process(&row(["2", "Ana", "1000", "", "savings"]), &ctx()));
        assert_eq!(savings.interest, dec("0.00"));
    }

    #[test]
    fn test_merge_keeps_known_age() {
        let domain = AccountDomain::standard().unwrap();
        let stored = emit(domain.process(&row(["1", "Ana", "100", "30", "savings"]), &ctx()));
        let incoming = emit(domain.process(&row(["1", "Ana Maria", "200", "", "checking"]), &ctx()));

        let merged = stored.merged_with(&incoming);
        assert_eq!(merged.owner_name, "Ana Maria");
        assert_eq!(merged.account_type, AccountType::Checking);
        assert_eq!(merged.balance, incoming.balance);
        assert_eq!(merged.age, Some(30));
    }
}
