//! Common traits for repositories, collaborators, and call control
//!
//! Defines the storage abstractions the services are written against and the
//! outbound command interface of the telephony transport.

use crate::error::AppError;
use crate::models::{
    Balance, CallEvent, CallHistoryRecord, Entitlement, EntitlementHistory, ExpiryReason, User,
    VoiceType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Talk-time ledger storage
#[async_trait]
pub trait BalanceRepository: Send + Sync {
    /// Find a user's ledger row
    async fn find_by_user(&self, user_id: i64) -> Result<Option<Balance>, AppError>;

    /// Return the ledger row, inserting a zeroed one if absent
    async fn get_or_create(&self, user_id: i64) -> Result<Balance, AppError>;

    /// Credit seconds in one step, creating the row if absent
    async fn add_seconds(&self, user_id: i64, seconds: i64) -> Result<Balance, AppError>;

    /// Debit seconds in one conditional step.
    ///
    /// Returns `Ok(false)` without mutating when `seconds` exceeds the remaining
    /// balance, and `Err(AppError::BalanceNotFound)` when no row exists.
    async fn deduct_seconds(&self, user_id: i64, seconds: i64) -> Result<bool, AppError>;
}

/// Active entitlement storage
#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    /// All entitlements, effect codes joined
    async fn find_all(&self) -> Result<Vec<Entitlement>, AppError>;

    async fn find_by_user(&self, user_id: i64) -> Result<Vec<Entitlement>, AppError>;

    async fn find_by_user_and_effect(
        &self,
        user_id: i64,
        effect_id: i64,
    ) -> Result<Option<Entitlement>, AppError>;

    /// Insert a new entitlement. Fails with `Conflict` if the pair already exists.
    async fn create(&self, entitlement: &Entitlement) -> Result<Entitlement, AppError>;

    /// Persist purchase and expiry fields of an existing entitlement
    async fn update(&self, entitlement: &Entitlement) -> Result<Entitlement, AppError>;

    /// Atomically clear the user's previous default and flag `entitlement_id`
    async fn set_default(&self, user_id: i64, entitlement_id: i64) -> Result<(), AppError>;

    /// Clear the user's default flag. Returns the number of rows changed.
    async fn clear_default(&self, user_id: i64) -> Result<u64, AppError>;

    /// Write a history row and delete the entitlement in one transaction.
    ///
    /// The delete only matches while the stored expiry clocks equal the ones
    /// in `entitlement`. Returns `Ok(None)`, writing nothing, when the row is
    /// gone or was renewed since it was read.
    async fn migrate_to_history(
        &self,
        entitlement: &Entitlement,
        reason: ExpiryReason,
        expired_at: DateTime<Utc>,
    ) -> Result<Option<EntitlementHistory>, AppError>;

    async fn count(&self) -> Result<i64, AppError>;
}

/// Read access to migrated entitlements
#[async_trait]
pub trait EntitlementHistoryRepository: Send + Sync {
    async fn find_all(&self) -> Result<Vec<EntitlementHistory>, AppError>;

    async fn find_by_user(&self, user_id: i64) -> Result<Vec<EntitlementHistory>, AppError>;

    async fn count(&self) -> Result<i64, AppError>;

    async fn count_by_reason(&self) -> Result<Vec<(ExpiryReason, i64)>, AppError>;

    /// Rows whose `expired_at` is at or after `since`
    async fn count_expired_since(&self, since: DateTime<Utc>) -> Result<i64, AppError>;
}

/// Call audit trail storage
#[async_trait]
pub trait CallHistoryRepository: Send + Sync {
    async fn create(&self, record: &CallHistoryRecord) -> Result<CallHistoryRecord, AppError>;

    async fn find_by_call_id(&self, call_id: &str)
        -> Result<Option<CallHistoryRecord>, AppError>;

    /// Overwrite the row for `record.call_id` unless it is already terminal.
    /// Returns `Ok(false)` when the row is missing or terminal.
    async fn update(&self, record: &CallHistoryRecord) -> Result<bool, AppError>;

    /// Most recent calls for a user
    async fn find_by_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<CallHistoryRecord>, AppError>;
}

/// Identity lookups
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError>;
}

/// Voice effect catalog
#[async_trait]
pub trait VoiceTypeRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<VoiceType>, AppError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<VoiceType>, AppError>;
}

/// Voice changer instruction for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectCommand {
    pub code: String,

    /// Tuning parameters sent after the changer starts. Empty means start only.
    pub params: Vec<String>,
}

/// Commands issued to the telephony switch
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Start the voice changer on a channel
    async fn apply_effect(&self, call_id: &str, effect: &EffectCommand) -> Result<(), AppError>;

    /// Continue routing a parked call
    async fn transfer(&self, call_id: &str, destination: &str) -> Result<(), AppError>;

    /// Drop a call
    async fn terminate(&self, call_id: &str) -> Result<(), AppError>;
}

/// Consumer of signaling events.
///
/// Implementations contain their own failures: an event that cannot be
/// processed is logged, never returned to the transport.
#[async_trait]
pub trait CallEventHandler: Send + Sync {
    async fn handle_event(&self, event: CallEvent);
}
