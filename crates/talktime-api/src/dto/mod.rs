//! Data Transfer Objects (DTOs) for API requests and responses

pub mod common;
pub mod hooks;
pub mod operations;
pub mod users;

pub use common::*;
pub use hooks::*;
pub use operations::*;
pub use users::*;
