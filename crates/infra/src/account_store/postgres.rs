//! Postgres-backed account store.
//!
//! Accounts and transactions live in two tables. Every ledger write runs inside
//! one SQL transaction that locks the account row (`FOR UPDATE`), checks the
//! expected version, updates the account and inserts the transaction row; any
//! failure rolls both back.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation on the reference index) | `23505` | `DuplicateReference` | Same `(user_id, reference_id)` inserted twice |
//! | Database (other unique violation) | `23505` | `Invariant` | Transaction id collision |
//! | Database (check constraint violation) | `23514` | `Invariant` | Negative balance / lifetime, zero amount |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / Io / other | N/A | `Backend` | Network errors, connection failures, etc. |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use pointsledger_core::{AggregateRoot, ExpectedVersion, TransactionId, UserId};
use pointsledger_points::{
    NewTransaction, PointsAccount, PointsTransaction, ReferenceId, TransactionType,
};

use super::r#trait::{AccountStore, CommittedEntry, LedgerEntry, StoreError};

const REFERENCE_INDEX: &str = "points_transactions_user_reference_idx";

/// DDL applied by [`PostgresAccountStore::ensure_schema`], one statement per entry.
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS points_accounts (
        user_id UUID PRIMARY KEY,
        points_balance BIGINT NOT NULL DEFAULT 0 CHECK (points_balance >= 0),
        lifetime_points BIGINT NOT NULL DEFAULT 0 CHECK (lifetime_points >= 0),
        tier TEXT NOT NULL DEFAULT 'bronze',
        version BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS points_transactions (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES points_accounts (user_id),
        points_amount BIGINT NOT NULL CHECK (points_amount <> 0),
        transaction_type TEXT NOT NULL,
        description TEXT NOT NULL,
        reference_id TEXT NULL,
        sequence_number BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS points_transactions_user_reference_idx
        ON points_transactions (user_id, reference_id)
        WHERE reference_id IS NOT NULL
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS points_transactions_user_sequence_idx
        ON points_transactions (user_id, sequence_number)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS points_transactions_user_recent_idx
        ON points_transactions (user_id, created_at DESC, sequence_number DESC)
    "#,
];

/// Postgres-backed points account store.
///
/// `Send + Sync`; share it behind an `Arc` across engine instances. The pool
/// handles connection management.
#[derive(Debug, Clone)]
pub struct PostgresAccountStore {
    pool: Arc<PgPool>,
}

impl PostgresAccountStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait::async_trait]
impl AccountStore for PostgresAccountStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn get_or_create_account(&self, user_id: UserId) -> Result<PointsAccount, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO points_accounts (user_id)
            VALUES ($1)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        let row = sqlx::query(
            r#"
            SELECT user_id, points_balance, lifetime_points, version, created_at, updated_at
            FROM points_accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_account", e))?
        .ok_or(StoreError::AccountNotFound(user_id))?;

        decode_account(&row)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn apply_delta(
        &self,
        user_id: UserId,
        points_delta: i64,
        lifetime_delta: i64,
        expected_version: ExpectedVersion,
    ) -> Result<PointsAccount, StoreError> {
        let mut tx = self.begin().await?;
        let account =
            write_delta(&mut tx, user_id, points_delta, lifetime_delta, expected_version).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(account)
    }

    #[instrument(skip(self, transaction), fields(user_id = %transaction.user_id), err)]
    async fn append_transaction(
        &self,
        transaction: NewTransaction,
    ) -> Result<PointsTransaction, StoreError> {
        let mut tx = self.begin().await?;
        let current = lock_account(&mut tx, transaction.user_id).await?;
        let recorded = insert_transaction(&mut tx, transaction, current.version()).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(recorded)
    }

    #[instrument(
        skip(self, entry),
        fields(
            user_id = %entry.user_id(),
            points_delta = entry.points_delta(),
            expected_version = ?entry.expected_version()
        ),
        err
    )]
    async fn commit_entry(&self, entry: LedgerEntry) -> Result<CommittedEntry, StoreError> {
        // Dropping `tx` without commit rolls back, so every early return below
        // leaves the database untouched.
        let mut tx = self.begin().await?;

        let account = write_delta(
            &mut tx,
            entry.user_id(),
            entry.points_delta(),
            entry.lifetime_delta(),
            entry.expected_version(),
        )
        .await?;
        let transaction =
            insert_transaction(&mut tx, entry.into_transaction(), account.version()).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(CommittedEntry {
            account,
            transaction,
        })
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn find_by_reference(
        &self,
        user_id: UserId,
        reference_id: &ReferenceId,
    ) -> Result<Option<PointsTransaction>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, points_amount, transaction_type, description,
                   reference_id, sequence_number, created_at
            FROM points_transactions
            WHERE user_id = $1 AND reference_id = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(reference_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_reference", e))?;

        row.as_ref().map(decode_transaction).transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<PointsTransaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, points_amount, transaction_type, description,
                   reference_id, sequence_number, created_at
            FROM points_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, sequence_number DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_transactions", e))?;

        rows.iter().map(decode_transaction).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn load_ledger(&self, user_id: UserId) -> Result<Vec<PointsTransaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, points_amount, transaction_type, description,
                   reference_id, sequence_number, created_at
            FROM points_transactions
            WHERE user_id = $1
            ORDER BY sequence_number ASC, created_at ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_ledger", e))?;

        rows.iter().map(decode_transaction).collect()
    }
}

/// Load and row-lock an account inside `tx`.
async fn lock_account(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
) -> Result<PointsAccount, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT user_id, points_balance, lifetime_points, version, created_at, updated_at
        FROM points_accounts
        WHERE user_id = $1
        FOR UPDATE
        "#,
    )
    .bind(user_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_account", e))?
    .ok_or(StoreError::AccountNotFound(user_id))?;

    decode_account(&row)
}

/// Version-checked account update inside `tx`.
///
/// The next state is computed by the domain (`PointsAccount::apply_delta`), so
/// tier derivation and invariant checks are identical to the in-memory store.
async fn write_delta(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
    points_delta: i64,
    lifetime_delta: i64,
    expected_version: ExpectedVersion,
) -> Result<PointsAccount, StoreError> {
    let current = lock_account(tx, user_id).await?;
    if !expected_version.matches(current.version()) {
        return Err(StoreError::VersionConflict {
            expected: expected_version,
            actual: current.version(),
        });
    }

    let next = current.apply_delta(points_delta, lifetime_delta, Utc::now())?;

    let result = sqlx::query(
        r#"
        UPDATE points_accounts
        SET points_balance = $2,
            lifetime_points = $3,
            tier = $4,
            version = $5,
            updated_at = $6
        WHERE user_id = $1 AND version = $7
        "#,
    )
    .bind(user_id.as_uuid())
    .bind(next.points_balance())
    .bind(next.lifetime_points())
    .bind(next.tier().as_str())
    .bind(next.version() as i64)
    .bind(next.updated_at())
    .bind(current.version() as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_account", e))?;

    if result.rows_affected() != 1 {
        return Err(StoreError::VersionConflict {
            expected: expected_version,
            actual: current.version() + 1,
        });
    }

    Ok(next)
}

async fn insert_transaction(
    tx: &mut Transaction<'_, Postgres>,
    transaction: NewTransaction,
    sequence_number: u64,
) -> Result<PointsTransaction, StoreError> {
    let recorded = transaction.into_recorded(TransactionId::new(), sequence_number, Utc::now());

    sqlx::query(
        r#"
        INSERT INTO points_transactions (
            id,
            user_id,
            points_amount,
            transaction_type,
            description,
            reference_id,
            sequence_number,
            created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(recorded.id.as_uuid())
    .bind(recorded.user_id.as_uuid())
    .bind(recorded.points_amount)
    .bind(recorded.transaction_type.as_str())
    .bind(&recorded.description)
    .bind(recorded.reference_id.as_ref().map(|r| r.as_str()))
    .bind(recorded.sequence_number as i64)
    .bind(recorded.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| match (&recorded.reference_id, reference_violation(&e)) {
        (Some(reference_id), true) => StoreError::DuplicateReference {
            reference_id: reference_id.clone(),
        },
        _ => map_sqlx_error("insert_transaction", e),
    })?;

    Ok(recorded)
}

fn reference_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505")
            && db_err.constraint() == Some(REFERENCE_INDEX);
    }
    false
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") | Some("23514") => StoreError::Invariant(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    user_id: uuid::Uuid,
    points_balance: i64,
    lifetime_points: i64,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            user_id: row.try_get("user_id")?,
            points_balance: row.try_get("points_balance")?,
            lifetime_points: row.try_get("lifetime_points")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug)]
struct TransactionRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    points_amount: i64,
    transaction_type: String,
    description: String,
    reference_id: Option<String>,
    sequence_number: i64,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            points_amount: row.try_get("points_amount")?,
            transaction_type: row.try_get("transaction_type")?,
            description: row.try_get("description")?,
            reference_id: row.try_get("reference_id")?,
            sequence_number: row.try_get("sequence_number")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn decode_account(row: &PgRow) -> Result<PointsAccount, StoreError> {
    let row = AccountRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to decode account row: {e}")))?;

    Ok(PointsAccount::restore(
        UserId::from_uuid(row.user_id),
        row.points_balance,
        row.lifetime_points,
        row.version as u64,
        row.created_at,
        row.updated_at,
    )?)
}

fn decode_transaction(row: &PgRow) -> Result<PointsTransaction, StoreError> {
    let row = TransactionRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to decode transaction row: {e}")))?;

    let transaction_type = TransactionType::new(&row.transaction_type)
        .map_err(|e| StoreError::Backend(format!("stored transaction type: {e}")))?;
    let reference_id = row
        .reference_id
        .map(ReferenceId::new)
        .transpose()
        .map_err(|e| StoreError::Backend(format!("stored reference id: {e}")))?;

    Ok(PointsTransaction {
        id: TransactionId::from_uuid(row.id),
        user_id: UserId::from_uuid(row.user_id),
        points_amount: row.points_amount,
        transaction_type,
        description: row.description,
        reference_id,
        sequence_number: row.sequence_number as u64,
        created_at: row.created_at,
    })
}
