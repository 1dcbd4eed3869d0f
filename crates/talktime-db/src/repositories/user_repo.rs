//! Identity directory and voice type catalog
//!
//! Both tables belong to the administration surface; the engine only reads them.

use async_trait::async_trait;
use sqlx::PgPool;
use talktime_core::{
    models::{User, VoiceType},
    traits::{UserDirectory, VoiceTypeRepository},
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of UserDirectory
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    #[instrument(skip(self))]
    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        debug!("Finding user by username: {}", username);

        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, username FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error finding user {}: {}", username, e);
                    AppError::Database(format!("Failed to find user: {}", e))
                })?;

        Ok(row.map(|(id, username)| User { id, username }))
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, username FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::Database(format!("Failed to find user: {}", e)))?;

        Ok(row.map(|(id, username)| User { id, username }))
    }
}

/// PostgreSQL implementation of VoiceTypeRepository
pub struct PgVoiceTypeRepository {
    pool: PgPool,
}

impl PgVoiceTypeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VoiceTypeRepository for PgVoiceTypeRepository {
    async fn find_by_id(&self, id: i64) -> AppResult<Option<VoiceType>> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, voice_name, code FROM voice_types WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::Database(format!("Failed to find voice type: {}", e)))?;

        Ok(row.map(|(id, voice_name, code)| VoiceType {
            id,
            voice_name,
            code,
        }))
    }

    async fn find_by_code(&self, code: &str) -> AppResult<Option<VoiceType>> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, voice_name, code FROM voice_types WHERE code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::Database(format!("Failed to find voice type: {}", e)))?;

        Ok(row.map(|(id, voice_name, code)| VoiceType {
            id,
            voice_name,
            code,
        }))
    }
}
