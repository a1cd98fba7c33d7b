//! Validated entities and their natural keys

use std::fmt;

use serde::{Deserialize, Serialize};

use super::account::Account;
use super::annual::AnnualSummary;
use super::transaction::{Anomaly, Transaction};

/// Which table an entity belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    Transaction,
    AnnualSummary,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Transaction => "transaction",
            EntityKind::AnnualSummary => "annual_summary",
        }
    }
}

/// Natural key used to reconcile incoming rows with stored rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKey {
    Account { account_number: String },
    Transaction { transaction_id: String },
    AnnualSummary { account_number: String, year: i32 },
}

impl EntityKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityKey::Account { .. } => EntityKind::Account,
            EntityKey::Transaction { .. } => EntityKind::Transaction,
            EntityKey::AnnualSummary { .. } => EntityKind::AnnualSummary,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Account { account_number } => write!(f, "account:{account_number}"),
            EntityKey::Transaction { transaction_id } => write!(f, "transaction:{transaction_id}"),
            EntityKey::AnnualSummary {
                account_number,
                year,
            } => write!(f, "annual:{account_number}/{year}"),
        }
    }
}

/// A record that passed every rule and is ready to persist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum ValidatedEntity {
    Account(Account),
    Transaction(Transaction),
    AnnualSummary(AnnualSummary),
}

impl ValidatedEntity {
    pub fn natural_key(&self) -> EntityKey {
        match self {
            ValidatedEntity::Account(a) => EntityKey::Account {
                account_number: a.account_number.clone(),
            },
            ValidatedEntity::Transaction(t) => EntityKey::Transaction {
                transaction_id: t.transaction_id.clone(),
            },
            ValidatedEntity::AnnualSummary(s) => EntityKey::AnnualSummary {
                account_number: s.account_number.clone(),
                year: s.year,
            },
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            ValidatedEntity::Account(_) => EntityKind::Account,
            ValidatedEntity::Transaction(_) => EntityKind::Transaction,
            ValidatedEntity::AnnualSummary(_) => EntityKind::AnnualSummary,
        }
    }

    /// Anomalies flagged during validation (transactions only)
    pub fn anomalies(&self) -> &[Anomaly] {
        match self {
            ValidatedEntity::Transaction(t) => &t.anomalies,
            _ => &[],
        }
    }

    /// Row to store when `self` is already persisted and `incoming` arrives
    /// with the same key. Mismatched kinds keep the incoming row.
    pub fn merged_with(&self, incoming: &ValidatedEntity) -> ValidatedEntity {
        match (self, incoming) {
            (ValidatedEntity::Account(current), ValidatedEntity::Account(next)) => {
                ValidatedEntity::Account(current.merged_with(next))
            },
            (ValidatedEntity::Transaction(current), ValidatedEntity::Transaction(next)) => {
                ValidatedEntity::Transaction(current.merged_with(next))
            },
            (ValidatedEntity::AnnualSummary(current), ValidatedEntity::AnnualSummary(next)) => {
                ValidatedEntity::AnnualSummary(current.merged_with(next))
            },
            _ => incoming.clone(),
        }
    }
}
