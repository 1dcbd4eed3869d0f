//! Operations DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use talktime_services::ActiveBridge;
use validator::Validate;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// `?user_id=` filter for sweep history
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct HistoryQuery {
    #[validate(range(min = 1))]
    pub user_id: Option<i64>,
}

/// In-flight call counters
#[derive(Debug, Clone, Serialize)]
pub struct CallActivityResponse {
    pub active_sessions: usize,
    pub active_bridges: usize,
    pub bridges: Vec<ActiveBridge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectUsersResponse {
    pub effect_code: String,
    pub user_ids: Vec<i64>,
}
