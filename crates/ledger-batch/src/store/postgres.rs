//! PostgreSQL store
//!
//! One table per entity kind, keyed by natural key. Upserts use
//! `INSERT ... ON CONFLICT DO UPDATE`; savepoints isolate entity failures
//! inside the chunk transaction.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Executor, Postgres, Row, Transaction as SqlTransaction};
use tracing::info;

use super::{EntityStore, StoreTransaction};
use crate::domain::{
    Account, AccountType, AnnualSummary, Anomaly, EntityKey, EntityKind, Movement, Transaction,
    TransactionCategory, ValidatedEntity,
};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections, "connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the entity tables if they do not exist yet
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn get(&self, key: &EntityKey) -> Result<Option<ValidatedEntity>, StoreError> {
        fetch_entity(&self.pool, key).await
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError> {
        let sql = match kind {
            EntityKind::Account => "SELECT COUNT(*) FROM accounts",
            EntityKind::Transaction => "SELECT COUNT(*) FROM transactions",
            EntityKind::AnnualSummary => "SELECT COUNT(*) FROM annual_summaries",
        };
        let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

struct PgStoreTransaction {
    tx: SqlTransaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn find_by_key(&mut self, key: &EntityKey) -> Result<Option<ValidatedEntity>, StoreError> {
        fetch_entity(&mut *self.tx, key).await
    }

    async fn upsert(&mut self, entity: &ValidatedEntity) -> Result<(), StoreError> {
        upsert_entity(&mut *self.tx, entity).await
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let sql = format!("SAVEPOINT {name}");
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let sql = format!("RELEASE SAVEPOINT {name}");
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let sql = format!("ROLLBACK TO SAVEPOINT {name}");
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Commit(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn fetch_entity<'e, E>(executor: E, key: &EntityKey) -> Result<Option<ValidatedEntity>, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    let lookup = |e: sqlx::Error| StoreError::Lookup {
        key: key.to_string(),
        message: e.to_string(),
    };

    match key {
        EntityKey::Account { account_number } => {
            let row = sqlx::query(
                "SELECT account_number, owner_name, account_type, balance, interest, age, as_of_month
                 FROM accounts WHERE account_number = $1",
            )
            .bind(account_number)
            .fetch_optional(executor)
            .await
            .map_err(lookup)?;
            row.map(|r| account_from_row(&r).map(ValidatedEntity::Account))
                .transpose()
        },
        EntityKey::Transaction { transaction_id } => {
            let row = sqlx::query(
                "SELECT transaction_id, booked_on, amount, category, description, anomalies
                 FROM transactions WHERE transaction_id = $1",
            )
            .bind(transaction_id)
            .fetch_optional(executor)
            .await
            .map_err(lookup)?;
            row.map(|r| transaction_from_row(&r).map(ValidatedEntity::Transaction))
                .transpose()
        },
        EntityKey::AnnualSummary {
            account_number,
            year,
        } => {
            let row = sqlx::query(
                "SELECT account_number, year, deposits, withdrawals, opening_balance, closing_balance,
                        audit_date, needs_review, last_movement, description
                 FROM annual_summaries WHERE account_number = $1 AND year = $2",
            )
            .bind(account_number)
            .bind(year)
            .fetch_optional(executor)
            .await
            .map_err(lookup)?;
            row.map(|r| annual_from_row(&r).map(ValidatedEntity::AnnualSummary))
                .transpose()
        },
    }
}

async fn upsert_entity<'e, E>(executor: E, entity: &ValidatedEntity) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    let write = |e: sqlx::Error| StoreError::Write {
        key: entity.natural_key().to_string(),
        message: e.to_string(),
    };

    let query = match entity {
        ValidatedEntity::Account(a) => sqlx::query(
            "INSERT INTO accounts (account_number, owner_name, account_type, balance, interest, age, as_of_month)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (account_number) DO UPDATE SET
                owner_name = EXCLUDED.owner_name,
                account_type = EXCLUDED.account_type,
                balance = EXCLUDED.balance,
                interest = EXCLUDED.interest,
                age = EXCLUDED.age,
                as_of_month = EXCLUDED.as_of_month,
                updated_at = NOW()",
        )
        .bind(&a.account_number)
        .bind(&a.owner_name)
        .bind(a.account_type.as_str())
        .bind(a.balance)
        .bind(a.interest)
        .bind(a.age.map(i32::from))
        .bind(a.as_of_month.to_string()),
        ValidatedEntity::Transaction(t) => sqlx::query(
            "INSERT INTO transactions (transaction_id, booked_on, amount, category, description, anomalies)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (transaction_id) DO UPDATE SET
                booked_on = EXCLUDED.booked_on,
                amount = EXCLUDED.amount,
                category = EXCLUDED.category,
                description = EXCLUDED.description,
                anomalies = EXCLUDED.anomalies,
                updated_at = NOW()",
        )
        .bind(&t.transaction_id)
        .bind(t.booked_on)
        .bind(t.amount)
        .bind(t.category.as_str())
        .bind(&t.description)
        .bind(Json(t.anomalies.clone())),
        ValidatedEntity::AnnualSummary(s) => sqlx::query(
            "INSERT INTO annual_summaries (account_number, year, deposits, withdrawals, opening_balance,
                                           closing_balance, audit_date, needs_review, last_movement, description)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (account_number, year) DO UPDATE SET
                deposits = EXCLUDED.deposits,
                withdrawals = EXCLUDED.withdrawals,
                opening_balance = EXCLUDED.opening_balance,
                closing_balance = EXCLUDED.closing_balance,
                audit_date = EXCLUDED.audit_date,
                needs_review = EXCLUDED.needs_review,
                last_movement = EXCLUDED.last_movement,
                description = EXCLUDED.description,
                updated_at = NOW()",
        )
        .bind(&s.account_number)
        .bind(s.year)
        .bind(s.deposits)
        .bind(s.withdrawals)
        .bind(s.opening_balance)
        .bind(s.closing_balance)
        .bind(s.audit_date)
        .bind(s.needs_review)
        .bind(s.last_movement.as_str())
        .bind(&s.description),
    };

    query.execute(executor).await.map_err(write)?;
    Ok(())
}

fn decode(what: &str, value: &str) -> StoreError {
    StoreError::Decode(format!("unknown {what} '{value}'"))
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let account_type: String = row.try_get("account_type")?;
    let as_of_month: String = row.try_get("as_of_month")?;
    let age: Option<i32> = row.try_get("age")?;

    Ok(Account {
        account_number: row.try_get("account_number")?,
        owner_name: row.try_get("owner_name")?,
        account_type: AccountType::from_synonym(&account_type)
            .ok_or_else(|| decode("account type", &account_type))?,
        balance: row.try_get("balance")?,
        interest: row.try_get("interest")?,
        age: age
            .map(u16::try_from)
            .transpose()
            .map_err(|e| StoreError::Decode(e.to_string()))?,
        as_of_month: as_of_month
            .parse()
            .map_err(|_| decode("month", &as_of_month))?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    let category: String = row.try_get("category")?;
    let anomalies: Json<Vec<Anomaly>> = row.try_get("anomalies")?;

    Ok(Transaction {
        transaction_id: row.try_get("transaction_id")?,
        booked_on: row.try_get("booked_on")?,
        amount: row.try_get("amount")?,
        category: TransactionCategory::from_synonym(&category)
            .ok_or_else(|| decode("category", &category))?,
        description: row.try_get("description")?,
        anomalies: anomalies.0,
    })
}

fn annual_from_row(row: &PgRow) -> Result<AnnualSummary, StoreError> {
    let movement: String = row.try_get("last_movement")?;

    Ok(AnnualSummary {
        account_number: row.try_get("account_number")?,
        year: row.try_get("year")?,
        deposits: row.try_get("deposits")?,
        withdrawals: row.try_get("withdrawals")?,
        opening_balance: row.try_get("opening_balance")?,
        closing_balance: row.try_get("closing_balance")?,
        audit_date: row.try_get("audit_date")?,
        needs_review: row.try_get("needs_review")?,
        last_movement: Movement::from_synonym(&movement).ok_or_else(|| decode("movement", &movement))?,
        description: row.try_get("description")?,
    })
}
