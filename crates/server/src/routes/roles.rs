use axum::{
    Json, Router,
    extract::State,
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::hierarchical_role::{CreateHierarchicalRole, HierarchicalRole};
use tracing::info;
use utils::response::ApiResponse;

use crate::{
    error::ApiError,
    middleware::{permission::USER_ADMINS, require_roles},
    state::AppState,
};

pub async fn list_roles(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<HierarchicalRole>>>, ApiError> {
    let roles = HierarchicalRole::find_active(&state.db.pool).await?;
    Ok(ResponseJson(ApiResponse::success(roles)))
}

pub async fn create_role(
    State(state): State<AppState>,
    Json(payload): Json<CreateHierarchicalRole>,
) -> Result<ResponseJson<ApiResponse<HierarchicalRole>>, ApiError> {
    let code = payload.code.trim();
    if payload.name.trim().is_empty() || code.is_empty() {
        return Err(ApiError::Validation("name and code are required".to_string()));
    }
    if payload.hierarchy_level < 1 {
        return Err(ApiError::Validation(
            "hierarchy_level must be at least 1".to_string(),
        ));
    }
    if HierarchicalRole::find_by_code(&state.db.pool, code).await?.is_some() {
        return Err(ApiError::Conflict(format!("role code '{code}' is already in use")));
    }

    let role = HierarchicalRole::create(&state.db.pool, &payload).await?;
    info!(role_id = %role.id, code = %role.code, is_manager = role.is_manager, "Hierarchical role created");
    Ok(ResponseJson(ApiResponse::success(role)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/hierarchical-roles", get(list_roles))
        .route(
            "/hierarchical-roles",
            post(create_role).route_layer(from_fn_with_state(USER_ADMINS, require_roles)),
        )
}
