//! HTTP request handlers

pub mod hooks;
pub mod operations;
pub mod users;

pub use hooks::configure as configure_hooks;
pub use operations::configure as configure_operations;
pub use users::configure as configure_users;
