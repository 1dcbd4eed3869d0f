//! Entitlement history repository implementation
//!
//! History rows are append-only; they are written by
//! `PgEntitlementRepository::migrate_to_history` and only read here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use talktime_core::{
    models::{EntitlementHistory, ExpiryReason},
    traits::EntitlementHistoryRepository,
    AppError, AppResult,
};
use tracing::{error, instrument, warn};

const SELECT_HISTORY: &str = r#"
    SELECT id, original_entitlement_id, user_id, voice_type_id, effect_code,
           is_purchased, assigned_at, trial_expires_at, subscription_expires_at,
           is_default, expired_at, expiry_reason, created_at
    FROM entitlement_history
"#;

/// PostgreSQL implementation of EntitlementHistoryRepository
pub struct PgEntitlementHistoryRepository {
    pool: PgPool,
}

impl PgEntitlementHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitlementHistoryRepository for PgEntitlementHistoryRepository {
    #[instrument(skip(self))]
    async fn find_all(&self) -> AppResult<Vec<EntitlementHistory>> {
        let rows = sqlx::query_as::<sqlx::Postgres, HistoryRow>(&format!(
            "{} ORDER BY expired_at DESC",
            SELECT_HISTORY
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading entitlement history: {}", e);
            AppError::Database(format!("Failed to load history: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_by_user(&self, user_id: i64) -> AppResult<Vec<EntitlementHistory>> {
        let rows = sqlx::query_as::<sqlx::Postgres, HistoryRow>(&format!(
            "{} WHERE user_id = $1 ORDER BY expired_at DESC",
            SELECT_HISTORY
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to load history: {}", e)))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count(&self) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entitlement_history")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to count history: {}", e)))?;

        Ok(result.0)
    }

    async fn count_by_reason(&self) -> AppResult<Vec<(ExpiryReason, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT expiry_reason, COUNT(*) FROM entitlement_history GROUP BY expiry_reason",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to count history: {}", e)))?;

        Ok(rows
            .into_iter()
            .filter_map(|(reason, count)| match ExpiryReason::from_str(&reason) {
                Some(reason) => Some((reason, count)),
                None => {
                    warn!("Skipping unknown expiry reason '{}'", reason);
                    None
                }
            })
            .collect())
    }

    async fn count_expired_since(&self, since: DateTime<Utc>) -> AppResult<i64> {
        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM entitlement_history WHERE expired_at >= $1")
                .bind(since)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::Database(format!("Failed to count history: {}", e)))?;

        Ok(result.0)
    }
}

/// Database row, shared with the entitlement repository's migration insert
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct HistoryRow {
    id: i64,
    original_entitlement_id: i64,
    user_id: i64,
    voice_type_id: i64,
    effect_code: String,
    is_purchased: bool,
    assigned_at: DateTime<Utc>,
    trial_expires_at: Option<DateTime<Utc>>,
    subscription_expires_at: Option<DateTime<Utc>>,
    is_default: bool,
    expired_at: DateTime<Utc>,
    expiry_reason: String,
    created_at: DateTime<Utc>,
}

impl From<HistoryRow> for EntitlementHistory {
    fn from(row: HistoryRow) -> Self {
        Self {
            id: row.id,
            original_entitlement_id: row.original_entitlement_id,
            user_id: row.user_id,
            effect_id: row.voice_type_id,
            effect_code: row.effect_code,
            is_purchased: row.is_purchased,
            assigned_at: row.assigned_at,
            trial_expires_at: row.trial_expires_at,
            subscription_expires_at: row.subscription_expires_at,
            is_default: row.is_default,
            expired_at: row.expired_at,
            expiry_reason: ExpiryReason::from_str(&row.expiry_reason)
                .unwrap_or(ExpiryReason::BothExpired),
            created_at: row.created_at,
        }
    }
}
