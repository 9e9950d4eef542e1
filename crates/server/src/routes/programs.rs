use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use db::models::{
    organization::Organization,
    program::{CreateProgram, Program, UpdateProgram},
};
use services::services::{
    permissions::{Action, Resource},
    program_scope::ProgramScope,
};
use tracing::info;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::{ensure_in_scope, require_permission},
    state::AppState,
};

pub async fn list_organizations(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<Organization>>>, ApiError> {
    let organizations = Organization::find_all(&state.db.pool).await?;
    Ok(ResponseJson(ApiResponse::success(organizations)))
}

pub async fn list_programs(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
) -> Result<ResponseJson<ApiResponse<Vec<Program>>>, ApiError> {
    let programs = Program::find_all(&state.db.pool, scope.program_id()).await?;
    Ok(ResponseJson(ApiResponse::success(programs)))
}

pub async fn get_program(
    State(state): State<AppState>,
    Path(program_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Program>>, ApiError> {
    let program = Program::find_by_id(&state.db.pool, program_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Program not found".to_string()))?;
    Ok(ResponseJson(ApiResponse::success(program)))
}

pub async fn create_program(
    State(state): State<AppState>,
    Json(payload): Json<CreateProgram>,
) -> Result<ResponseJson<ApiResponse<Program>>, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".to_string()));
    }
    if Organization::find_by_id(&state.db.pool, payload.organization_id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound("Organization not found".to_string()));
    }
    let program = Program::create(&state.db.pool, &payload).await?;
    info!(program_id = %program.id, organization_id = %program.organization_id, "Program created");
    Ok(ResponseJson(ApiResponse::success(program)))
}

pub async fn update_program(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(program_id): Path<Uuid>,
    Json(payload): Json<UpdateProgram>,
) -> Result<ResponseJson<ApiResponse<Program>>, ApiError> {
    ensure_in_scope(&scope, program_id)?;
    if payload.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::Validation("name is required".to_string()));
    }
    let program = Program::update(&state.db.pool, program_id, &payload)
        .await?
        .ok_or_else(|| ApiError::NotFound("Program not found".to_string()))?;
    Ok(ResponseJson(ApiResponse::success(program)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/organizations",
            get(list_organizations).route_layer(from_fn_with_state(
                (Resource::Organizations, Action::View),
                require_permission,
            )),
        )
        .route(
            "/programs",
            get(list_programs).route_layer(from_fn_with_state(
                (Resource::Programs, Action::View),
                require_permission,
            )),
        )
        .route(
            "/programs",
            post(create_program).route_layer(from_fn_with_state(
                (Resource::Programs, Action::Create),
                require_permission,
            )),
        )
        .route(
            "/programs/{program_id}",
            get(get_program).route_layer(from_fn_with_state(
                (Resource::Programs, Action::View),
                require_permission,
            )),
        )
        .route(
            "/programs/{program_id}",
            put(update_program).route_layer(from_fn_with_state(
                (Resource::Programs, Action::Edit),
                require_permission,
            )),
        )
}
