//! Talk-time balance model
//!
//! One ledger row per user, all quantities in whole seconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user talk-time ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: i64,

    /// Seconds ever credited
    pub purchased_seconds: i64,

    /// Seconds deducted by the most recent settlement
    pub last_used_seconds: i64,

    /// Seconds ever deducted
    pub total_used_seconds: i64,

    /// Seconds still available, never negative
    pub remaining_seconds: i64,

    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Zeroed ledger row
    pub fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            purchased_seconds: 0,
            last_used_seconds: 0,
            total_used_seconds: 0,
            remaining_seconds: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn has_talk_time(&self) -> bool {
        self.remaining_seconds > 0
    }

    /// remaining = purchased - total_used
    pub fn is_consistent(&self) -> bool {
        self.remaining_seconds >= 0
            && self.remaining_seconds == self.purchased_seconds - self.total_used_seconds
    }

    /// Credit `seconds`
    pub fn credit(&mut self, seconds: i64) {
        self.purchased_seconds += seconds;
        self.remaining_seconds += seconds;
        self.updated_at = Utc::now();
    }

    /// Debit `seconds` if covered. Leaves the row untouched and returns false otherwise.
    pub fn debit(&mut self, seconds: i64) -> bool {
        if seconds > self.remaining_seconds {
            return false;
        }
        self.last_used_seconds = seconds;
        self.total_used_seconds += seconds;
        self.remaining_seconds -= seconds;
        self.updated_at = Utc::now();
        true
    }
}
