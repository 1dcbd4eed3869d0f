//! Per-user DTOs

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SetDefaultEffectRequest {
    #[validate(length(min = 1, max = 16, message = "Effect code is required"))]
    pub effect_code: String,
}

/// Effects a caller can use right now
#[derive(Debug, Clone, Serialize)]
pub struct UserEffectsResponse {
    pub username: String,
    pub effects: Vec<String>,
    pub default_effect: Option<String>,
    /// What the next bridged call would apply
    pub effective_effect: String,
}

/// Query for call listings
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecentCallsQuery {
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 500))]
    pub limit: i64,
}

fn default_limit() -> i64 {
    talktime_services::constants::RECENT_CALLS_LIMIT
}
