//! Notification rate limiting for manager team messages.

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use db::models::user::User;
use serde_json::Value;
use services::services::rate_limit::RateLimitStatus;

use crate::{error::ApiError, state::AppState};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Recipients named by a notification body; zero when it names none or is not JSON.
pub fn requested_recipients(body: &[u8]) -> usize {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("recipient_ids").and_then(Value::as_array).map(Vec::len))
        .unwrap_or(0)
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

fn apply_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    set_header(headers, "X-RateLimit-Limit-Hourly", status.hourly.limit);
    set_header(headers, "X-RateLimit-Remaining-Hourly", status.hourly.remaining());
    set_header(headers, "X-RateLimit-Limit-Daily", status.daily.limit);
    set_header(headers, "X-RateLimit-Remaining-Daily", status.daily.remaining());
}

/// Check the sender's hourly and daily windows before the handler and count the
/// notification only when the handler succeeded.
pub async fn limit_notifications(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = request
        .extensions()
        .get::<User>()
        .map(|u| u.id)
        .ok_or(ApiError::Unauthenticated)?;

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::Validation(format!("could not read request body: {e}")))?;

    state
        .rate_limiter
        .check(user_id, requested_recipients(&bytes), Utc::now())?;

    let mut response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

    let now = Utc::now();
    let status = if response.status().is_success() {
        state.rate_limiter.record_success(user_id, now)
    } else {
        state.rate_limiter.status(user_id, now)
    };
    apply_headers(response.headers_mut(), &status);
    Ok(response)
}
