use std::collections::HashMap;

use axum::{
    extract::{FromRequestParts, Query, RawPathParams, Request},
    middleware::Next,
    response::Response,
};
use db::models::user::User;
use services::services::program_scope::{ProgramScope, resolve_scope};
use tracing::warn;

use crate::{error::ApiError, state::AppState};

/// Confine program-level roles to their own program and record the effective
/// [`ProgramScope`] for handlers.
pub async fn enforce_program_scope(request: Request, next: Next) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();
    let user = parts
        .extensions
        .get::<User>()
        .cloned()
        .ok_or(ApiError::Unauthenticated)?;

    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|q| q.0)
        .unwrap_or_default();
    let route_program = RawPathParams::from_request_parts(&mut parts, &())
        .await
        .ok()
        .and_then(|params| {
            params
                .iter()
                .find(|(name, _)| *name == "program_id")
                .map(|(_, value)| value.to_string())
        });

    let scope = resolve_scope(
        user.role,
        user.program_id,
        query.get("program_id").map(String::as_str),
        route_program.as_deref(),
    )
    .map_err(|violation| {
        warn!(
            user_id = %user.id,
            role = %user.role,
            path = %parts.uri.path(),
            code = violation.code(),
            "Program scope violation"
        );
        violation
    })?;

    parts.extensions.insert(scope);
    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Reject a record outside the caller's program.
pub fn ensure_in_scope(scope: &ProgramScope, program_id: uuid::Uuid) -> Result<(), ApiError> {
    if scope.allows(program_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "You can only access data within your assigned program".to_string(),
        ))
    }
}

/// Reject a user outside the caller's program. Applies to every program-scoped role, bypass
/// role or not.
pub async fn ensure_user_in_scope(
    state: &AppState,
    caller: &User,
    scope: &ProgramScope,
    target: uuid::Uuid,
) -> Result<(), ApiError> {
    let Some(program_id) = scope.program_id() else {
        return Ok(());
    };
    if caller.id == target || state.hierarchy.is_program_member(target, program_id).await? {
        return Ok(());
    }
    warn!(
        user_id = %caller.id,
        target_id = %target,
        program_id = %program_id,
        "User outside caller's program"
    );
    Err(ApiError::Forbidden(
        "You can only access users within your assigned program".to_string(),
    ))
}
