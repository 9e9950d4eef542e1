use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{delete, get, put},
};
use db::models::{
    organization::ActiveStatus,
    user::{CreateUser, PermissionOverrides, User, UserRole},
};
use serde::{Deserialize, Serialize};
use services::services::{
    permissions::{self, Action, PermissionService, Resource},
    program_scope::ProgramScope,
};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::{
        ensure_in_scope,
        permission::{PROGRAM_STAFF, SUPER_ADMIN, USER_ADMINS},
        require_roles,
    },
    state::AppState,
};

#[derive(Debug, Deserialize, TS)]
pub struct UserListQuery {
    pub program_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, TS)]
pub struct UpdateStatus {
    pub status: ActiveStatus,
}

#[derive(Debug, Deserialize, TS)]
pub struct SetPermission {
    pub resource: Resource,
    pub action: Action,
    pub allowed: bool,
}

#[derive(Debug, Deserialize, TS)]
pub struct PermissionKey {
    pub resource: Resource,
    pub action: Action,
}

#[derive(Debug, Serialize, TS)]
pub struct UserPermissions {
    pub user_id: Uuid,
    pub role: UserRole,
    #[ts(type = "Record<string, Record<string, boolean>>")]
    pub effective: PermissionOverrides,
    #[ts(type = "Record<string, Record<string, boolean>> | null")]
    pub overrides: Option<PermissionOverrides>,
}

impl From<&User> for UserPermissions {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
            effective: permissions::effective_permissions(user),
            overrides: user.overrides().cloned(),
        }
    }
}

async fn load_user(state: &AppState, user_id: Uuid) -> Result<User, ApiError> {
    User::find_by_id(&state.db.pool, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Query(query): Query<UserListQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<User>>>, ApiError> {
    let users = User::find_all(&state.db.pool, scope.filter(query.program_id)).await?;
    Ok(ResponseJson(ApiResponse::success(users)))
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Json(payload): Json<CreateUser>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    if let ProgramScope::Program(program_id) = scope {
        if payload.program_id != Some(program_id) {
            return Err(ApiError::Forbidden(
                "Users can only be created in your assigned program".to_string(),
            ));
        }
    }
    if payload.role.is_platform_admin() && !actor.role.is_platform_admin() {
        return Err(ApiError::Forbidden(
            "Only platform administrators can create administrators".to_string(),
        ));
    }
    let user = state.auth.create_user(&payload).await?;
    Ok(ResponseJson(ApiResponse::success(user)))
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateStatus>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    let target = load_user(&state, user_id).await?;
    if scope.program_id().is_some() {
        // users without a program are outside every program scope
        ensure_in_scope(&scope, target.program_id.unwrap_or_else(Uuid::nil))?;
    }
    User::update_status(&state.db.pool, user_id, payload.status).await?;
    let user = load_user(&state, user_id).await?;
    Ok(ResponseJson(ApiResponse::success(user)))
}

pub async fn get_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<UserPermissions>>, ApiError> {
    let user = load_user(&state, user_id).await?;
    Ok(ResponseJson(ApiResponse::success(UserPermissions::from(&user))))
}

pub async fn set_permission(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<SetPermission>,
) -> Result<ResponseJson<ApiResponse<UserPermissions>>, ApiError> {
    let user = PermissionService::set_override(
        &state.db,
        &actor,
        user_id,
        payload.resource,
        payload.action,
        payload.allowed,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(UserPermissions::from(&user))))
}

pub async fn remove_permission(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    Path(user_id): Path<Uuid>,
    Query(key): Query<PermissionKey>,
) -> Result<ResponseJson<ApiResponse<UserPermissions>>, ApiError> {
    let user =
        PermissionService::remove_override(&state.db, &actor, user_id, key.resource, key.action)
            .await?;
    Ok(ResponseJson(ApiResponse::success(UserPermissions::from(&user))))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/users",
            get(list_users)
                .post(create_user)
                .route_layer(from_fn_with_state(USER_ADMINS, require_roles)),
        )
        .route(
            "/users/{user_id}/status",
            put(update_status).route_layer(from_fn_with_state(USER_ADMINS, require_roles)),
        )
        .route(
            "/users/{user_id}/permissions",
            get(get_permissions).route_layer(from_fn_with_state(PROGRAM_STAFF, require_roles)),
        )
        .route(
            "/users/{user_id}/permissions",
            put(set_permission).route_layer(from_fn_with_state(SUPER_ADMIN, require_roles)),
        )
        .route(
            "/users/{user_id}/permissions",
            delete(remove_permission).route_layer(from_fn_with_state(SUPER_ADMIN, require_roles)),
        )
}
