//! TalkTime Database Layer
//!
//! PostgreSQL access and repository implementations for the call engine:
//!
//! - Connection pool management and embedded migrations with sqlx
//! - Repositories for balances, entitlements, history, and call records
//! - Transactional history migration and default-effect switching
//! - An in-memory store implementing the same traits

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::MemoryStore;
pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use sqlx::PgPool;
pub use talktime_core::{AppError, AppResult};
