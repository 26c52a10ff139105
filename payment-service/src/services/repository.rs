//! Status store: the durable home of payment records.
//!
//! The unique constraint on `reference` doubles as the idempotency index, so
//! record insert and index update are a single atomic statement. All settled
//! state flows through `compare_and_set_status`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{FailureReason, NewPayment, Payment, PaymentStatus};
use crate::services::metrics::DB_QUERY_DURATION;

/// Persistence contract shared by the gateway, the settlement workers and
/// the reconciliation sweep.
///
/// `compare_and_set_status` returning `false` means the expected status no
/// longer matches; callers treat that as "settled by another worker", not as
/// an error.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Atomic insert-or-fetch keyed on `reference`. The boolean is `true`
    /// when this call created the record.
    async fn insert_if_absent(&self, draft: NewPayment) -> Result<(Payment, bool), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, AppError>;

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>, AppError>;

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        new_status: PaymentStatus,
        failure_reason: Option<FailureReason>,
    ) -> Result<bool, AppError>;

    /// Pending payments whose `updated_at` predates `cutoff`, oldest first.
    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, AppError>;

    /// Advance `updated_at` of a still-pending payment so a requeue resets
    /// its staleness clock. Returns `false` once the payment is terminal.
    async fn touch_pending(&self, id: Uuid) -> Result<bool, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

const PAYMENT_COLUMNS: &str =
    "id, reference, amount, currency, status, failure_reason, created_at, updated_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    #[instrument(skip(database_url))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn insert_if_absent(&self, draft: NewPayment) -> Result<(Payment, bool), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_if_absent"])
            .start_timer();

        let payment = Payment::pending(draft);
        let inserted = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (id, reference, amount, currency, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (reference) DO NOTHING
            RETURNING id, reference, amount, currency, status, failure_reason, created_at, updated_at
            "#,
        )
        .bind(payment.id)
        .bind(&payment.reference)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert payment: {}", e)))?;

        timer.observe_duration();

        match inserted {
            Some(created) => Ok((created, true)),
            None => {
                // Lost the insert race: surface the winner's record.
                let existing = self.find_by_reference(&payment.reference).await?.ok_or_else(|| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Reference '{}' conflicted but has no record",
                        payment.reference
                    ))
                })?;
                Ok((existing, false))
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION.with_label_values(&["get"]).start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch payment: {}", e)))?;

        timer.observe_duration();
        Ok(payment)
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_by_reference"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to fetch payment by reference: {}", e))
        })?;

        timer.observe_duration();
        Ok(payment)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        new_status: PaymentStatus,
        failure_reason: Option<FailureReason>,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["compare_and_set_status"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $3, failure_reason = $4, updated_at = now()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(new_status)
        .bind(failure_reason)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update payment status: {}", e))
        })?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_stale_pending"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at
            LIMIT $3
            "#
        ))
        .bind(PaymentStatus::Pending)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to scan stale payments: {}", e))
        })?;

        timer.observe_duration();
        Ok(payments)
    }

    async fn touch_pending(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE payments SET updated_at = now() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(PaymentStatus::Pending)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to touch payment: {}", e))
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}
