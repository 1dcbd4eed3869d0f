//! Balance ledger service
//!
//! Talk-time accounting in whole seconds:
//! - Read-only reservation check at admission
//! - Credits from package purchases and top-ups
//! - Deductions at settlement, rejected rather than clamped
//!
//! Every mutation is a single conditional step in the repository, so
//! concurrent credits and deductions for the same user never interleave.

use std::sync::Arc;
use talktime_core::{models::Balance, traits::BalanceRepository, AppError, AppResult};
use tracing::{debug, info, instrument, warn};

/// Ledger over a balance repository
pub struct BalanceLedger {
    repo: Arc<dyn BalanceRepository>,
}

impl BalanceLedger {
    pub fn new(repo: Arc<dyn BalanceRepository>) -> Self {
        Self { repo }
    }

    /// Remaining seconds, 0 when the user has no ledger row. Never mutates.
    #[instrument(skip(self))]
    pub async fn reserve(&self, user_id: i64) -> AppResult<i64> {
        let remaining = self
            .repo
            .find_by_user(user_id)
            .await?
            .map(|b| b.remaining_seconds)
            .unwrap_or(0);

        debug!("User {} has {}s remaining", user_id, remaining);
        Ok(remaining)
    }

    /// Credit `seconds`, creating the ledger row if absent
    #[instrument(skip(self))]
    pub async fn add_seconds(&self, user_id: i64, seconds: i64) -> AppResult<Balance> {
        if seconds < 0 {
            return Err(AppError::Validation(format!(
                "Cannot credit negative seconds: {}",
                seconds
            )));
        }

        let balance = self.repo.add_seconds(user_id, seconds).await?;
        info!(
            "Credited {}s to user {}, remaining {}s",
            seconds, user_id, balance.remaining_seconds
        );
        Ok(balance)
    }

    /// Debit `seconds`. `Ok(false)` when the balance does not cover it.
    #[instrument(skip(self))]
    pub async fn deduct_seconds(&self, user_id: i64, seconds: i64) -> AppResult<bool> {
        if seconds < 0 {
            return Err(AppError::Validation(format!(
                "Cannot deduct negative seconds: {}",
                seconds
            )));
        }

        let deducted = self.repo.deduct_seconds(user_id, seconds).await?;
        if deducted {
            debug!("Deducted {}s from user {}", seconds, user_id);
        }
        Ok(deducted)
    }

    /// Debit `seconds`, reporting a refused deduction as `LedgerInsufficientFunds`
    pub async fn settle(&self, user_id: i64, seconds: i64) -> AppResult<()> {
        if self.deduct_seconds(user_id, seconds).await? {
            return Ok(());
        }

        let remaining = self.reserve(user_id).await.unwrap_or_else(|e| {
            warn!("Could not read balance of user {} after refusal: {}", user_id, e);
            0
        });
        Err(AppError::LedgerInsufficientFunds {
            user_id,
            requested: seconds,
            remaining,
        })
    }

    /// Ledger row, zeroed and persisted if absent
    pub async fn balance_for(&self, user_id: i64) -> AppResult<Balance> {
        self.repo.get_or_create(user_id).await
    }

    pub async fn has_balance(&self, user_id: i64) -> AppResult<bool> {
        Ok(self.reserve(user_id).await? > 0)
    }
}
