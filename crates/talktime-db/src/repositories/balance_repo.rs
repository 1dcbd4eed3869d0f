//! Balance repository implementation
//!
//! Every mutation is a single SQL statement so concurrent credits and debits on
//! the same user serialize on the row lock without a read-then-write window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use talktime_core::{models::Balance, traits::BalanceRepository, AppError, AppResult};
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of BalanceRepository
pub struct PgBalanceRepository {
    pool: PgPool,
}

impl PgBalanceRepository {
    /// Create a new balance repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, user_id: i64) -> AppResult<bool> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT user_id FROM balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error checking balance {}: {}", user_id, e);
                    AppError::Database(format!("Failed to check balance: {}", e))
                })?;

        Ok(found.is_some())
    }
}

#[async_trait]
impl BalanceRepository for PgBalanceRepository {
    #[instrument(skip(self))]
    async fn find_by_user(&self, user_id: i64) -> AppResult<Option<Balance>> {
        debug!("Finding balance for user: {}", user_id);

        let row = sqlx::query_as::<sqlx::Postgres, BalanceRow>(
            r#"
            SELECT user_id, purchased_seconds, last_used_seconds,
                   total_used_seconds, remaining_seconds, updated_at
            FROM balances
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding balance {}: {}", user_id, e);
            AppError::Database(format!("Failed to find balance: {}", e))
        })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn get_or_create(&self, user_id: i64) -> AppResult<Balance> {
        let row = sqlx::query_as::<sqlx::Postgres, BalanceRow>(
            r#"
            INSERT INTO balances (user_id)
            VALUES ($1)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING user_id, purchased_seconds, last_used_seconds,
                      total_used_seconds, remaining_seconds, updated_at
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error creating balance {}: {}", user_id, e);
            AppError::Database(format!("Failed to create balance: {}", e))
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn add_seconds(&self, user_id: i64, seconds: i64) -> AppResult<Balance> {
        debug!("Crediting {}s to user {}", seconds, user_id);

        let row = sqlx::query_as::<sqlx::Postgres, BalanceRow>(
            r#"
            INSERT INTO balances (user_id, purchased_seconds, remaining_seconds)
            VALUES ($1, $2, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET purchased_seconds = balances.purchased_seconds + EXCLUDED.purchased_seconds,
                remaining_seconds = balances.remaining_seconds + EXCLUDED.remaining_seconds,
                updated_at = NOW()
            RETURNING user_id, purchased_seconds, last_used_seconds,
                      total_used_seconds, remaining_seconds, updated_at
            "#,
        )
        .bind(user_id)
        .bind(seconds)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error crediting user {}: {}", user_id, e);
            AppError::Database(format!("Failed to add talk time: {}", e))
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn deduct_seconds(&self, user_id: i64, seconds: i64) -> AppResult<bool> {
        debug!("Debiting {}s from user {}", seconds, user_id);

        let updated = sqlx::query(
            r#"
            UPDATE balances
            SET last_used_seconds = $2,
                total_used_seconds = total_used_seconds + $2,
                remaining_seconds = remaining_seconds - $2,
                updated_at = NOW()
            WHERE user_id = $1 AND remaining_seconds >= $2
            "#,
        )
        .bind(user_id)
        .bind(seconds)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error debiting user {}: {}", user_id, e);
            AppError::Database(format!("Failed to deduct talk time: {}", e))
        })?;

        if updated.rows_affected() == 1 {
            return Ok(true);
        }

        if self.exists(user_id).await? {
            Ok(false)
        } else {
            Err(AppError::BalanceNotFound(user_id))
        }
    }
}

/// Database row
#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    user_id: i64,
    purchased_seconds: i64,
    last_used_seconds: i64,
    total_used_seconds: i64,
    remaining_seconds: i64,
    updated_at: DateTime<Utc>,
}

impl From<BalanceRow> for Balance {
    fn from(row: BalanceRow) -> Self {
        Self {
            user_id: row.user_id,
            purchased_seconds: row.purchased_seconds,
            last_used_seconds: row.last_used_seconds,
            total_used_seconds: row.total_used_seconds,
            remaining_seconds: row.remaining_seconds,
            updated_at: row.updated_at,
        }
    }
}
