//! API layer for TalkTime
//!
//! Operator and collaborator endpoints: sweep control, cache maintenance,
//! per-user effect and balance views, and the lifecycle hooks the
//! administration surface calls.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;
pub mod state;

pub use dto::ApiResponse;
pub use handlers::{configure_hooks, configure_operations, configure_users};
pub use state::AppState;

use actix_web::web;

/// Every route, relative to the `/api/v1` scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(configure_operations)
        .configure(configure_users)
        .configure(configure_hooks);
}
