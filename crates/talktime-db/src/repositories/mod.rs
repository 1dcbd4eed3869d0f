//! Repository implementations
//!
//! Concrete implementations of the storage traits defined in talktime-core,
//! using sqlx for PostgreSQL access.

pub mod balance_repo;
pub mod call_history_repo;
pub mod entitlement_repo;
pub mod history_repo;
pub mod user_repo;

pub use balance_repo::PgBalanceRepository;
pub use call_history_repo::PgCallHistoryRepository;
pub use entitlement_repo::PgEntitlementRepository;
pub use history_repo::PgEntitlementHistoryRepository;
pub use user_repo::{PgUserDirectory, PgVoiceTypeRepository};
