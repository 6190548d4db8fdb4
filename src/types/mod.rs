mod details;
mod models;
mod permission;

pub use details::*;
pub use models::*;
pub use permission::PermissionLevel;
