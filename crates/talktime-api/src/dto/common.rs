//! Common DTOs used across the API

use serde::Serialize;
use talktime_core::AppError;
use validator::Validate;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            data,
            message: None,
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: Some(message.into()),
        }
    }
}

/// Run `validator` rules, mapping failures onto `AppError::Validation`
pub fn validate<T: Validate>(req: &T) -> Result<(), AppError> {
    req.validate().map_err(|e| {
        tracing::warn!("Request validation failed: {}", e);
        AppError::Validation(e.to_string())
    })
}
