use axum::{
    Extension, Json, Router,
    extract::State,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::user::{PermissionOverrides, User};
use serde::Serialize;
use services::services::{
    auth::{LoginRequest, LoginResponse, Session},
    permissions,
};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Serialize, TS)]
pub struct CurrentUser {
    pub user: User,
    #[ts(type = "Record<string, Record<string, boolean>>")]
    pub permissions: PermissionOverrides,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<ResponseJson<ApiResponse<LoginResponse>>, ApiError> {
    let response = state.auth.login(&payload).await?;
    Ok(ResponseJson(ApiResponse::success(response)))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.auth.logout(&session).await?;
    Ok(ResponseJson(ApiResponse::success_with_message((), "Logged out")))
}

pub async fn me(Extension(user): Extension<User>) -> ResponseJson<ApiResponse<CurrentUser>> {
    let permissions = permissions::effective_permissions(&user);
    ResponseJson(ApiResponse::success(CurrentUser { user, permissions }))
}

/// Routes reachable without a token.
pub fn public_router() -> Router<AppState> {
    Router::new().route("/auth/login", post(login))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}
