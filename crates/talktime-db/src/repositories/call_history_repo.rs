//! Call history repository implementation
//!
//! Terminal rows (COMPLETED, REJECTED, FAILED) are never overwritten: the
//! update statement filters them out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use talktime_core::{
    models::{CallHistoryRecord, CallStatus},
    traits::CallHistoryRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of CallHistoryRepository
pub struct PgCallHistoryRepository {
    pool: PgPool,
}

impl PgCallHistoryRepository {
    /// Create a new call history repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallHistoryRepository for PgCallHistoryRepository {
    #[instrument(skip(self, record), fields(call_id = %record.call_id))]
    async fn create(&self, record: &CallHistoryRecord) -> AppResult<CallHistoryRecord> {
        debug!("Recording call {} as {}", record.call_id, record.status);

        let row = sqlx::query_as::<sqlx::Postgres, CallHistoryRow>(
            r#"
            INSERT INTO call_history (
                call_id, calling_party, called_party, source_address, user_id,
                created_at, started_at, ended_at, duration_seconds, status,
                hangup_cause, codec
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id, call_id, calling_party, called_party, source_address, user_id,
                      created_at, started_at, ended_at, duration_seconds, status,
                      hangup_cause, codec
            "#,
        )
        .bind(&record.call_id)
        .bind(&record.calling_party)
        .bind(&record.called_party)
        .bind(&record.source_address)
        .bind(record.user_id)
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.ended_at)
        .bind(record.duration_seconds)
        .bind(record.status.to_string())
        .bind(&record.hangup_cause)
        .bind(&record.codec)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error recording call {}: {}", record.call_id, e);
            if e.to_string().contains("unique") || e.to_string().contains("duplicate") {
                AppError::Conflict(format!("Call {} already recorded", record.call_id))
            } else {
                AppError::Database(format!("Failed to record call: {}", e))
            }
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn find_by_call_id(&self, call_id: &str) -> AppResult<Option<CallHistoryRecord>> {
        let row = sqlx::query_as::<sqlx::Postgres, CallHistoryRow>(
            r#"
            SELECT id, call_id, calling_party, called_party, source_address, user_id,
                   created_at, started_at, ended_at, duration_seconds, status,
                   hangup_cause, codec
            FROM call_history
            WHERE call_id = $1
            "#,
        )
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to find call history: {}", e)))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, record), fields(call_id = %record.call_id))]
    async fn update(&self, record: &CallHistoryRecord) -> AppResult<bool> {
        let terminal = CallStatus::terminal_names();

        let result = sqlx::query(
            r#"
            UPDATE call_history
            SET started_at = $2,
                ended_at = $3,
                duration_seconds = $4,
                status = $5,
                hangup_cause = $6,
                codec = $7
            WHERE call_id = $1
              AND status NOT IN ($8, $9, $10)
            "#,
        )
        .bind(&record.call_id)
        .bind(record.started_at)
        .bind(record.ended_at)
        .bind(record.duration_seconds)
        .bind(record.status.to_string())
        .bind(&record.hangup_cause)
        .bind(&record.codec)
        .bind(terminal[0])
        .bind(terminal[1])
        .bind(terminal[2])
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error updating call {}: {}", record.call_id, e);
            AppError::Database(format!("Failed to update call history: {}", e))
        })?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn find_by_user(&self, user_id: i64, limit: i64) -> AppResult<Vec<CallHistoryRecord>> {
        let rows = sqlx::query_as::<sqlx::Postgres, CallHistoryRow>(
            r#"
            SELECT id, call_id, calling_party, called_party, source_address, user_id,
                   created_at, started_at, ended_at, duration_seconds, status,
                   hangup_cause, codec
            FROM call_history
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to load call history: {}", e)))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Database row
#[derive(Debug, sqlx::FromRow)]
struct CallHistoryRow {
    id: i64,
    call_id: String,
    calling_party: String,
    called_party: String,
    source_address: String,
    user_id: Option<i64>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: i64,
    status: String,
    hangup_cause: Option<String>,
    codec: Option<String>,
}

impl From<CallHistoryRow> for CallHistoryRecord {
    fn from(row: CallHistoryRow) -> Self {
        Self {
            id: row.id,
            call_id: row.call_id,
            calling_party: row.calling_party,
            called_party: row.called_party,
            source_address: row.source_address,
            user_id: row.user_id,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            duration_seconds: row.duration_seconds,
            status: CallStatus::from_str(&row.status).unwrap_or(CallStatus::Failed),
            hangup_cause: row.hangup_cause,
            codec: row.codec,
        }
    }
}
