use axum::{
    Extension, Router,
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{
    notification_log::{NotificationLog, NotificationLogFilter},
    user::User,
    user_notification::UserNotification,
};
use serde::{Deserialize, Serialize};
use services::services::program_scope::ProgramScope;
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::{permission::USER_ADMINS, require_roles},
    state::AppState,
};

#[derive(Debug, Default, Deserialize, TS)]
pub struct InboxQuery {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize, TS)]
pub struct UnreadCount {
    pub unread: i64,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<InboxQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<UserNotification>>>, ApiError> {
    let notifications = state
        .notifications
        .list_for_user(user.id, query.unread_only)
        .await?;
    Ok(ResponseJson(ApiResponse::success(notifications)))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<ResponseJson<ApiResponse<UnreadCount>>, ApiError> {
    let unread = state.notifications.unread_count(user.id).await?;
    Ok(ResponseJson(ApiResponse::success(UnreadCount { unread })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(notification_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<UserNotification>>, ApiError> {
    let notification = state
        .notifications
        .mark_read(notification_id, user.id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(notification)))
}

pub async fn notification_logs(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Query(mut filter): Query<NotificationLogFilter>,
) -> Result<ResponseJson<ApiResponse<Vec<NotificationLog>>>, ApiError> {
    filter.program_id = scope.filter(filter.program_id);
    let logs = state.notifications.logs(&filter).await?;
    Ok(ResponseJson(ApiResponse::success(logs)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/{notification_id}/read", post(mark_read))
        .route(
            "/notification-logs",
            get(notification_logs).route_layer(from_fn_with_state(USER_ADMINS, require_roles)),
        )
}
