//! Entitlement repository implementation
//!
//! Entitlements are stored against voice type ids; reads join the voice type
//! code so callers always see the effect code. Default switching and history
//! migration each run in a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use talktime_core::{
    models::{Entitlement, EntitlementHistory, ExpiryReason},
    traits::EntitlementRepository,
    AppError, AppResult,
};
use tracing::{debug, error, info, instrument, warn};

use super::history_repo::HistoryRow;

const SELECT_ENTITLEMENT: &str = r#"
    SELECT e.id, e.user_id, e.voice_type_id, v.code AS effect_code,
           e.is_purchased, e.assigned_at, e.trial_expires_at,
           e.subscription_expires_at, e.is_default
    FROM entitlements e
    JOIN voice_types v ON v.id = e.voice_type_id
"#;

/// PostgreSQL implementation of EntitlementRepository
pub struct PgEntitlementRepository {
    pool: PgPool,
}

impl PgEntitlementRepository {
    /// Create a new entitlement repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_id(&self, id: i64) -> AppResult<Option<Entitlement>> {
        let row = sqlx::query_as::<sqlx::Postgres, EntitlementRow>(&format!(
            "{} WHERE e.id = $1",
            SELECT_ENTITLEMENT
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding entitlement {}: {}", id, e);
            AppError::Database(format!("Failed to find entitlement: {}", e))
        })?;

        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl EntitlementRepository for PgEntitlementRepository {
    #[instrument(skip(self))]
    async fn find_all(&self) -> AppResult<Vec<Entitlement>> {
        let rows = sqlx::query_as::<sqlx::Postgres, EntitlementRow>(&format!(
            "{} ORDER BY e.user_id, v.code",
            SELECT_ENTITLEMENT
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading entitlements: {}", e);
            AppError::Database(format!("Failed to load entitlements: {}", e))
        })?;

        debug!("Loaded {} entitlements", rows.len());
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_by_user(&self, user_id: i64) -> AppResult<Vec<Entitlement>> {
        let rows = sqlx::query_as::<sqlx::Postgres, EntitlementRow>(&format!(
            "{} WHERE e.user_id = $1 ORDER BY v.code",
            SELECT_ENTITLEMENT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading entitlements for {}: {}", user_id, e);
            AppError::Database(format!("Failed to load entitlements: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_by_user_and_effect(
        &self,
        user_id: i64,
        effect_id: i64,
    ) -> AppResult<Option<Entitlement>> {
        let row = sqlx::query_as::<sqlx::Postgres, EntitlementRow>(&format!(
            "{} WHERE e.user_id = $1 AND e.voice_type_id = $2",
            SELECT_ENTITLEMENT
        ))
        .bind(user_id)
        .bind(effect_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding entitlement: {}", e);
            AppError::Database(format!("Failed to find entitlement: {}", e))
        })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, entitlement))]
    async fn create(&self, entitlement: &Entitlement) -> AppResult<Entitlement> {
        debug!(
            "Creating entitlement user={} effect={}",
            entitlement.user_id, entitlement.effect_code
        );

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO entitlements (
                user_id, voice_type_id, is_purchased, assigned_at,
                trial_expires_at, subscription_expires_at, is_default
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(entitlement.user_id)
        .bind(entitlement.effect_id)
        .bind(entitlement.is_purchased)
        .bind(entitlement.assigned_at)
        .bind(entitlement.trial_expires_at)
        .bind(entitlement.subscription_expires_at)
        .bind(entitlement.is_default)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error creating entitlement: {}", e);
            if e.to_string().contains("unique") || e.to_string().contains("duplicate") {
                AppError::Conflict(format!(
                    "User {} already holds effect {}",
                    entitlement.user_id, entitlement.effect_code
                ))
            } else {
                AppError::Database(format!("Failed to create entitlement: {}", e))
            }
        })?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Entitlement {} vanished after insert", id)))
    }

    #[instrument(skip(self, entitlement))]
    async fn update(&self, entitlement: &Entitlement) -> AppResult<Entitlement> {
        let result = sqlx::query(
            r#"
            UPDATE entitlements
            SET is_purchased = $2,
                trial_expires_at = $3,
                subscription_expires_at = $4
            WHERE id = $1
            "#,
        )
        .bind(entitlement.id)
        .bind(entitlement.is_purchased)
        .bind(entitlement.trial_expires_at)
        .bind(entitlement.subscription_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error updating entitlement {}: {}", entitlement.id, e);
            AppError::Database(format!("Failed to update entitlement: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::EntitlementNotFound(entitlement.id.to_string()));
        }

        self.find_by_id(entitlement.id)
            .await?
            .ok_or_else(|| AppError::EntitlementNotFound(entitlement.id.to_string()))
    }

    #[instrument(skip(self))]
    async fn set_default(&self, user_id: i64, entitlement_id: i64) -> AppResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        sqlx::query("UPDATE entitlements SET is_default = FALSE WHERE user_id = $1 AND is_default")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(format!("Failed to clear default: {}", e)))?;

        let result = sqlx::query(
            "UPDATE entitlements SET is_default = TRUE WHERE id = $1 AND user_id = $2",
        )
        .bind(entitlement_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Database(format!("Failed to set default: {}", e)))?;

        if result.rows_affected() != 1 {
            return Err(AppError::EntitlementNotFound(entitlement_id.to_string()));
        }

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        info!("Default entitlement for user {} set to {}", user_id, entitlement_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_default(&self, user_id: i64) -> AppResult<u64> {
        let result =
            sqlx::query("UPDATE entitlements SET is_default = FALSE WHERE user_id = $1 AND is_default")
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::Database(format!("Failed to clear default: {}", e)))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, entitlement), fields(entitlement_id = entitlement.id))]
    async fn migrate_to_history(
        &self,
        entitlement: &Entitlement,
        reason: ExpiryReason,
        expired_at: DateTime<Utc>,
    ) -> AppResult<Option<EntitlementHistory>> {
        let history = EntitlementHistory::from_expired(entitlement, reason, expired_at);

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM entitlements
            WHERE id = $1
              AND trial_expires_at IS NOT DISTINCT FROM $2
              AND subscription_expires_at IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(entitlement.id)
        .bind(entitlement.trial_expires_at)
        .bind(entitlement.subscription_expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Database(format!("Failed to delete entitlement: {}", e)))?;

        if deleted.rows_affected() != 1 {
            tx.rollback().await.map_err(|e| {
                AppError::Transaction(format!("Failed to roll back transaction: {}", e))
            })?;
            warn!(
                "Entitlement {} changed or removed since it was read, not migrated",
                entitlement.id
            );
            return Ok(None);
        }

        let row = sqlx::query_as::<sqlx::Postgres, HistoryRow>(
            r#"
            INSERT INTO entitlement_history (
                original_entitlement_id, user_id, voice_type_id, effect_code,
                is_purchased, assigned_at, trial_expires_at, subscription_expires_at,
                is_default, expired_at, expiry_reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id, original_entitlement_id, user_id, voice_type_id, effect_code,
                      is_purchased, assigned_at, trial_expires_at, subscription_expires_at,
                      is_default, expired_at, expiry_reason, created_at
            "#,
        )
        .bind(history.original_entitlement_id)
        .bind(history.user_id)
        .bind(history.effect_id)
        .bind(&history.effect_code)
        .bind(history.is_purchased)
        .bind(history.assigned_at)
        .bind(history.trial_expires_at)
        .bind(history.subscription_expires_at)
        .bind(history.is_default)
        .bind(history.expired_at)
        .bind(history.expiry_reason.to_string())
        .bind(history.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::Database(format!("Failed to write history: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(Some(row.into()))
    }

    #[instrument(skip(self))]
    async fn count(&self) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entitlements")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error counting entitlements: {}", e);
                AppError::Database(format!("Failed to count entitlements: {}", e))
            })?;

        Ok(result.0)
    }
}

/// Database row
#[derive(Debug, sqlx::FromRow)]
struct EntitlementRow {
    id: i64,
    user_id: i64,
    voice_type_id: i64,
    effect_code: String,
    is_purchased: bool,
    assigned_at: DateTime<Utc>,
    trial_expires_at: Option<DateTime<Utc>>,
    subscription_expires_at: Option<DateTime<Utc>>,
    is_default: bool,
}

impl From<EntitlementRow> for Entitlement {
    fn from(row: EntitlementRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            effect_id: row.voice_type_id,
            effect_code: row.effect_code,
            is_purchased: row.is_purchased,
            assigned_at: row.assigned_at,
            trial_expires_at: row.trial_expires_at,
            subscription_expires_at: row.subscription_expires_at,
            is_default: row.is_default,
        }
    }
}
