use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use serde::Serialize;
use services::services::database_validator::{DatabaseValidator, ValidationResult};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Serialize, TS)]
pub struct HealthReport {
    pub status: String,
    pub database: ValidationResult,
    pub email_enabled: bool,
}

pub async fn health(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<HealthReport>>, ApiError> {
    let database = DatabaseValidator::new(state.db.pool.clone()).validate().await?;
    let status = if database.is_ok() { "ok" } else { "degraded" };
    let message = database.summary();

    Ok(ResponseJson(ApiResponse::success_with_message(
        HealthReport {
            status: status.to_string(),
            database,
            email_enabled: state.notifications.email_enabled(),
        },
        message,
    )))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
