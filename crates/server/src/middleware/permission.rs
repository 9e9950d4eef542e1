//! Resource permission and role gates.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use db::models::user::{User, UserRole};
use services::services::permissions::{self, Action, Resource};
use tracing::warn;

use crate::error::ApiError;

pub const PLATFORM_ADMINS: &[UserRole] = &[UserRole::SuperAdmin, UserRole::Admin];
pub const SUPER_ADMIN: &[UserRole] = &[UserRole::SuperAdmin];
pub const USER_ADMINS: &[UserRole] = &[UserRole::SuperAdmin, UserRole::Admin, UserRole::ProgramAdmin];
pub const PROGRAM_STAFF: &[UserRole] = &[
    UserRole::SuperAdmin,
    UserRole::Admin,
    UserRole::ProgramAdmin,
    UserRole::ProgramManager,
    UserRole::ProgramModerator,
    UserRole::EvaluationAdmin,
];

fn current_user(request: &Request) -> Result<&User, ApiError> {
    request
        .extensions()
        .get::<User>()
        .ok_or(ApiError::Unauthenticated)
}

/// Route layer: `from_fn_with_state((Resource::Programs, Action::Edit), require_permission)`.
pub async fn require_permission(
    State((resource, action)): State<(Resource, Action)>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = current_user(&request)?;
    let decision = permissions::check(user, resource, action);
    if !decision.allowed {
        warn!(
            user_id = %user.id,
            role = %user.role,
            resource = %resource,
            action = %action,
            "Permission denied"
        );
        return Err(ApiError::Forbidden(format!(
            "You do not have permission to {action} {resource}"
        )));
    }
    Ok(next.run(request).await)
}

/// Route layer: `from_fn_with_state(SUPER_ADMIN, require_roles)`.
pub async fn require_roles(
    State(roles): State<&'static [UserRole]>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = current_user(&request)?;
    if !roles.contains(&user.role) {
        warn!(user_id = %user.id, role = %user.role, path = %request.uri().path(), "Role not allowed");
        return Err(ApiError::Forbidden(
            "You do not have access to this resource".to_string(),
        ));
    }
    Ok(next.run(request).await)
}
