//! Unified error handling for TalkTime
//!
//! This module provides a single error type covering storage, metering,
//! entitlement, and transport failures, with automatic HTTP response mapping
//! for the operator API.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Metering Errors ====================
    #[error("Call admission rejected: {0}")]
    AdmissionRejected(String),

    #[error("Insufficient talk time for user {user_id}: requested {requested}s, remaining {remaining}s")]
    LedgerInsufficientFunds {
        user_id: i64,
        requested: i64,
        remaining: i64,
    },

    #[error("Balance not found for user: {0}")]
    BalanceNotFound(i64),

    // ==================== Entitlement Errors ====================
    #[error("Entitlement not found: {0}")]
    EntitlementNotFound(String),

    #[error("Voice effect not found: {0}")]
    EffectNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Sweep failed for entitlement {entitlement_id}: {message}")]
    SweepRecordFailure { entitlement_id: i64, message: String },

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ==================== Transport Errors ====================
    #[error("ESL connection error: {0}")]
    EslConnection(String),

    #[error("Transport command failed: {0}")]
    TransportCommand(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,

            // 402 Payment Required
            AppError::LedgerInsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,

            // 403 Forbidden
            AppError::AdmissionRejected(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::BalanceNotFound(_)
            | AppError::EntitlementNotFound(_)
            | AppError::EffectNotFound(_)
            | AppError::UserNotFound(_)
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict(_) => StatusCode::CONFLICT,

            // 502 Bad Gateway
            AppError::EslConnection(_) | AppError::TransportCommand(_) => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::AdmissionRejected(_) => "admission_rejected",
            AppError::LedgerInsufficientFunds { .. } => "insufficient_talk_time",
            AppError::BalanceNotFound(_) => "balance_not_found",
            AppError::EntitlementNotFound(_) => "entitlement_not_found",
            AppError::EffectNotFound(_) => "effect_not_found",
            AppError::UserNotFound(_) => "user_not_found",
            AppError::SweepRecordFailure { .. } => "sweep_record_failure",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::EslConnection(_) => "esl_connection_error",
            AppError::TransportCommand(_) => "transport_command_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
