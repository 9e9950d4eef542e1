use axum::{
    extract::{RawPathParams, Request, State},
    middleware::Next,
    response::Response,
};
use db::models::user::User;
use services::services::program_scope::ProgramScope;
use tracing::warn;
use uuid::Uuid;

use super::ensure_user_in_scope;
use crate::{error::ApiError, state::AppState};

fn path_uuid(params: &RawPathParams, name: &str) -> Option<Uuid> {
    params
        .iter()
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| value.parse().ok())
}

/// Keep managers on their own team: `{manager_id}` must be the caller and `{member_id}` must
/// report to the caller. Bypass roles skip both checks, but a program-scoped caller never
/// reaches a user outside its program.
pub async fn validate_data_scope(
    State(state): State<AppState>,
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<User>()
        .cloned()
        .ok_or(ApiError::Unauthenticated)?;
    let scope = request
        .extensions()
        .get::<ProgramScope>()
        .copied()
        .ok_or(ApiError::Unauthenticated)?;
    let manager_id = path_uuid(&params, "manager_id");
    let member_id = path_uuid(&params, "member_id");
    for target in manager_id.into_iter().chain(member_id) {
        ensure_user_in_scope(&state, &user, &scope, target).await?;
    }
    if state.hierarchy.bypasses_scope(user.role) {
        return Ok(next.run(request).await);
    }

    if let Some(manager_id) = manager_id {
        if manager_id != user.id {
            warn!(user_id = %user.id, manager_id = %manager_id, "Manager data scope violation");
            return Err(ApiError::Forbidden(
                "You can only access your own team's data".to_string(),
            ));
        }
    }

    if let Some(member_id) = member_id {
        if !state
            .hierarchy
            .is_user_in_manager_chain(user.id, member_id, None)
            .await?
        {
            warn!(user_id = %user.id, member_id = %member_id, "Team member outside manager chain");
            return Err(ApiError::Forbidden(
                "This user is not a member of your team".to_string(),
            ));
        }
    }

    Ok(next.run(request).await)
}
