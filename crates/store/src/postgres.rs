use async_trait::async_trait;
use metrics::counter;
use sqlx::{Acquire, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, Change, Result, StoreError, StoredRecord, TransactionId, Version,
    store::{Store, StoreTransaction, TransactionOptions, validate_changes},
};

/// Primary key constraint of the `aggregates` table.
const PRIMARY_KEY: &str = "aggregates_pkey";

/// PostgreSQL-backed record store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<StoredRecord> {
        Ok(StoredRecord {
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            updated_at: row.try_get("updated_at")?,
            state: row.try_get("state")?,
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self, options: TransactionOptions) -> Result<Box<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            options.isolation.as_sql()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PostgresTransaction {
            id: TransactionId::new(),
            tx,
        }))
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, aggregate_type, version, updated_at, state
            FROM aggregates
            WHERE id = $1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_type, version, updated_at, state
            FROM aggregates
            WHERE aggregate_type = $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(aggregate_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}

/// An open PostgreSQL transaction.
///
/// sqlx rolls the underlying transaction back when it is dropped without a
/// commit, so an abandoned `PostgresTransaction` never leaves writes behind.
struct PostgresTransaction {
    id: TransactionId,
    tx: Transaction<'static, Postgres>,
}

/// Maps a failed statement to a store error, classifying constraint violations.
fn map_write_error(error: sqlx::Error, change: &Change) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = error
        && let Some(constraint) = db_err.constraint()
    {
        if constraint == PRIMARY_KEY {
            return StoreError::ConcurrencyConflict {
                aggregate_id: change.aggregate_id(),
                expected: change.expected_version(),
                actual: Version::first(),
            };
        }
        return StoreError::ConstraintViolation {
            constraint: constraint.to_string(),
            detail: db_err.message().to_string(),
        };
    }
    StoreError::Database(error)
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    async fn load(&mut self, aggregate_id: AggregateId) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, aggregate_type, version, updated_at, state
            FROM aggregates
            WHERE id = $1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(PostgresStore::row_to_record).transpose()
    }

    async fn write(&mut self, changes: Vec<Change>) -> Result<usize> {
        validate_changes(&changes)?;

        // A savepoint keeps the batch atomic without aborting the outer transaction.
        let mut savepoint = self.tx.begin().await?;

        for change in &changes {
            let rows_affected = match change {
                Change::Insert(record) => sqlx::query(
                    r#"
                    INSERT INTO aggregates (id, aggregate_type, version, updated_at, state)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(record.aggregate_id.as_uuid())
                .bind(&record.aggregate_type)
                .bind(record.version.as_i64())
                .bind(record.updated_at)
                .bind(&record.state)
                .execute(&mut *savepoint)
                .await
                .map_err(|e| map_write_error(e, change))?
                .rows_affected(),
                Change::Update { record, expected } => sqlx::query(
                    r#"
                    UPDATE aggregates
                    SET version = $2, updated_at = $3, state = $4
                    WHERE id = $1 AND version = $5
                    "#,
                )
                .bind(record.aggregate_id.as_uuid())
                .bind(record.version.as_i64())
                .bind(record.updated_at)
                .bind(&record.state)
                .bind(expected.as_i64())
                .execute(&mut *savepoint)
                .await
                .map_err(|e| map_write_error(e, change))?
                .rows_affected(),
                Change::Delete {
                    aggregate_id,
                    expected,
                    ..
                } => sqlx::query("DELETE FROM aggregates WHERE id = $1 AND version = $2")
                    .bind(aggregate_id.as_uuid())
                    .bind(expected.as_i64())
                    .execute(&mut *savepoint)
                    .await
                    .map_err(|e| map_write_error(e, change))?
                    .rows_affected(),
            };

            if rows_affected == 0 {
                let actual: Option<i64> =
                    sqlx::query_scalar("SELECT version FROM aggregates WHERE id = $1")
                        .bind(change.aggregate_id().as_uuid())
                        .fetch_optional(&mut *savepoint)
                        .await?;

                return Err(StoreError::ConcurrencyConflict {
                    aggregate_id: change.aggregate_id(),
                    expected: change.expected_version(),
                    actual: actual.map(Version::new).unwrap_or(Version::initial()),
                });
            }
        }

        savepoint.commit().await?;
        Ok(changes.len())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let id = self.id;
        self.tx.commit().await?;
        counter!("store_transactions_total", "outcome" => "commit").increment(1);
        tracing::trace!(transaction_id = %id, "postgres transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        counter!("store_transactions_total", "outcome" => "rollback").increment(1);
        Ok(())
    }
}
