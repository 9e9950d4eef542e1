//! Platform settings, super-admin only.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use db::models::{notification_log::DeliveryStatus, system_setting::SystemSetting, user::User};
use serde::{Deserialize, Serialize};
use services::services::{
    email_templates,
    notification::Delivery,
    sendgrid::SendGridError,
};
use tracing::info;
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{
    error::ApiError,
    middleware::{permission::SUPER_ADMIN, require_roles},
    state::AppState,
};

#[derive(Debug, Deserialize, TS)]
pub struct UpdateSetting {
    pub value: String,
    #[serde(default)]
    pub is_secret: bool,
}

#[derive(Debug, Deserialize, TS)]
pub struct TestEmailRequest {
    pub to: String,
}

#[derive(Debug, Serialize, TS)]
pub struct TestEmailResult {
    pub to: String,
    pub status: DeliveryStatus,
}

pub async fn list_settings(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<SystemSetting>>>, ApiError> {
    let settings = SystemSetting::find_all(&state.db.pool)
        .await?
        .into_iter()
        .map(SystemSetting::masked)
        .collect();
    Ok(ResponseJson(ApiResponse::success(settings)))
}

pub async fn update_setting(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(key): Path<String>,
    Json(payload): Json<UpdateSetting>,
) -> Result<ResponseJson<ApiResponse<SystemSetting>>, ApiError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ApiError::Validation("setting key is required".to_string()));
    }
    let setting =
        SystemSetting::upsert(&state.db.pool, key, &payload.value, payload.is_secret).await?;
    info!(key = %setting.key, updated_by = %user.id, "System setting updated");
    Ok(ResponseJson(ApiResponse::success(setting.masked())))
}

pub async fn send_test_email(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<TestEmailRequest>,
) -> Result<ResponseJson<ApiResponse<TestEmailResult>>, ApiError> {
    let to = payload.to.trim();
    if !to.contains('@') {
        return Err(ApiError::Validation("a valid recipient email is required".to_string()));
    }
    if !state.notifications.email_enabled() {
        return Err(SendGridError::NotConfigured.into());
    }

    let status = state
        .notifications
        .deliver(Delivery {
            program_id: None,
            sender_user_id: Some(user.id),
            recipient_user_id: None,
            recipient_email: to,
            recipient_name: None,
            notification_type: "test_email",
            content: email_templates::test_email(to),
        })
        .await?;

    let message = match status {
        DeliveryStatus::Sent => "Test email sent",
        _ => "Test email could not be delivered",
    };
    Ok(ResponseJson(ApiResponse::success_with_message(
        TestEmailResult {
            to: to.to_string(),
            status,
        },
        message,
    )))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/system-settings", get(list_settings))
        .route("/system-settings/test-email", post(send_test_email))
        .route("/system-settings/{key}", put(update_setting))
        .route_layer(from_fn_with_state(SUPER_ADMIN, require_roles))
}
