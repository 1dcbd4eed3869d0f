//! TalkTime Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the TalkTime prepaid voice-effect call engine. It includes:
//!
//! - Domain models (Balance, Entitlement, CallSession, CallHistoryRecord, etc.)
//! - The entitlement activity predicate and expiry classification
//! - Repository, directory, and call-control traits
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
