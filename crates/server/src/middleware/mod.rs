pub mod audit;
pub mod auth;
pub mod data_scope;
pub mod permission;
pub mod program_scope;
pub mod rate_limit;

pub use auth::require_auth;
pub use data_scope::validate_data_scope;
pub use permission::{require_permission, require_roles};
pub use program_scope::{enforce_program_scope, ensure_in_scope, ensure_user_in_scope};
