use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Currency, Money, NewTransaction, PaymentMethod, Transaction, TransactionPatch,
    TransactionStatus,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    LedgerError, Result, StatusTransition, TransactionId, UserId,
    store::{TransactionStore, UpdateOptions, transition_for, validate_update},
};

const COLUMNS: &str = "id, user_id, phone_number, operator_id, origin_country, face_amount, \
    amount, currency, status, payment_method, payment_id, provider_transaction_id, \
    correlation_id, refund_id, error_message, created_at, updated_at";

/// PostgreSQL-backed transaction store.
///
/// Status changes are conditional updates (`WHERE status = <stored>`), so two
/// writers racing on the same record cannot both win, even across nodes.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    /// Creates a new PostgreSQL transaction store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_transaction(row: PgRow) -> Result<Transaction> {
        let id = TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let corrupt = |field: &str, err: String| {
            LedgerError::Corrupt(format!("transaction {id} field {field}: {err}"))
        };

        let status: String = row.try_get("status")?;
        let method: String = row.try_get("payment_method")?;
        let currency: String = row.try_get("currency")?;

        Ok(Transaction {
            id,
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            phone_number: row.try_get("phone_number")?,
            operator_id: row.try_get("operator_id")?,
            origin_country: row.try_get("origin_country")?,
            face_amount: Money::from_minor(row.try_get("face_amount")?),
            amount: Money::from_minor(row.try_get("amount")?),
            currency: Currency::new(&currency).map_err(|e| corrupt("currency", e.to_string()))?,
            status: status.parse::<TransactionStatus>().map_err(|e| corrupt("status", e))?,
            payment_method: method.parse::<PaymentMethod>().map_err(|e| corrupt("payment_method", e))?,
            payment_id: row.try_get("payment_id")?,
            provider_transaction_id: row.try_get("provider_transaction_id")?,
            correlation_id: row.try_get("correlation_id")?,
            refund_id: row.try_get("refund_id")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_transition(row: PgRow) -> Result<StatusTransition> {
        let parse = |value: String| {
            value
                .parse::<TransactionStatus>()
                .map_err(LedgerError::Corrupt)
        };
        let from: Option<String> = row.try_get("from_status")?;

        Ok(StatusTransition {
            transaction_id: TransactionId::from_uuid(row.try_get::<Uuid, _>("transaction_id")?),
            from: from.map(parse).transpose()?,
            to: parse(row.try_get("to_status")?)?,
            note: row.try_get("note")?,
            at: row.try_get::<DateTime<Utc>, _>("at")?,
        })
    }

    async fn insert_transition<'e, E>(executor: E, entry: &StatusTransition) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO transaction_transitions (transaction_id, from_status, to_status, note, at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.transaction_id.as_uuid())
        .bind(entry.from.map(|s| s.as_str()))
        .bind(entry.to.as_str())
        .bind(&entry.note)
        .bind(entry.at)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction> {
        let tx = Transaction::from_new(TransactionId::new(), new, Utc::now());
        let mut db = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO transactions (id, user_id, phone_number, operator_id, origin_country,
                face_amount, amount, currency, status, payment_method, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(tx.id.as_uuid())
        .bind(tx.user_id.as_str())
        .bind(&tx.phone_number)
        .bind(&tx.operator_id)
        .bind(&tx.origin_country)
        .bind(tx.face_amount.minor())
        .bind(tx.amount.minor())
        .bind(tx.currency.as_str())
        .bind(tx.status.as_str())
        .bind(tx.payment_method.as_str())
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&mut *db)
        .await?;

        Self::insert_transition(&mut *db, &StatusTransition::created(tx.id, tx.created_at)).await?;
        db.commit().await?;
        Ok(tx)
    }

    async fn update(
        &self,
        id: TransactionId,
        patch: TransactionPatch,
        options: UpdateOptions,
    ) -> Result<Transaction> {
        let current = self.get(id).await?.ok_or(LedgerError::NotFound(id))?;
        validate_update(&current, &patch, &options)?;

        let now = Utc::now();
        let entry = transition_for(&current, &patch, now);
        let mut next = current.clone();
        next.apply(patch, now);

        let mut db = self.pool.begin().await?;

        // Conditional on the status we validated against. A concurrent writer
        // that got there first leaves zero rows to update.
        let query = format!(
            r#"
            UPDATE transactions
            SET status = $3, payment_id = $4, provider_transaction_id = $5,
                correlation_id = $6, refund_id = $7, error_message = $8, updated_at = $9
            WHERE id = $1 AND status = $2
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .bind(current.status.as_str())
            .bind(next.status.as_str())
            .bind(&next.payment_id)
            .bind(&next.provider_transaction_id)
            .bind(&next.correlation_id)
            .bind(&next.refund_id)
            .bind(&next.error_message)
            .bind(next.updated_at)
            .fetch_optional(&mut *db)
            .await?;

        let Some(row) = row else {
            db.rollback().await?;
            let actual = self.get(id).await?.ok_or(LedgerError::NotFound(id))?.status;
            metrics::counter!("ledger_status_conflicts_total").increment(1);
            tracing::warn!(transaction_id = %id, expected = %current.status, %actual, "conditional update lost the race");
            return Err(LedgerError::StatusConflict {
                id,
                expected: current.status,
                actual,
            });
        };

        if let Some(entry) = &entry {
            Self::insert_transition(&mut *db, entry).await?;
        }
        db.commit().await?;

        Self::row_to_transaction(row)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM transactions WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn list_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    async fn history(&self, id: TransactionId) -> Result<Vec<StatusTransition>> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, from_status, to_status, note, at
            FROM transaction_transitions
            WHERE transaction_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transition).collect()
    }
}
