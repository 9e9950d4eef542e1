use std::{collections::HashMap, time::Instant};

use axum::{
    body::{Body, to_bytes},
    extract::{OriginalUri, Query, Request, State},
    middleware::Next,
    response::Response,
};
use db::models::{manager_action_log::NewManagerAction, user::User};
use serde_json::Value;
use services::services::audit;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

const MAX_BODY_BYTES: usize = 1024 * 1024;

fn program_from(payload: Option<&Value>, query: &HashMap<String, String>) -> Option<Uuid> {
    query
        .get("program_id")
        .and_then(|v| v.parse().ok())
        .or_else(|| {
            payload
                .and_then(|p| p.get("program_id"))
                .and_then(Value::as_str)
                .and_then(|v| v.parse().ok())
        })
}

/// Record every hierarchy request with its outcome, timing and redacted payload.
pub async fn audit_manager_actions(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config.security.audit_logging_enabled {
        return Ok(next.run(request).await);
    }

    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let user_id = parts.extensions.get::<User>().map(|u| u.id);
    let method = parts.method.to_string();
    let path = parts
        .extensions
        .get::<OriginalUri>()
        .map(|u| u.0.path().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|q| q.0)
        .unwrap_or_default();

    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::Validation(format!("could not read request body: {e}")))?;
    let payload = serde_json::from_slice::<Value>(&bytes).ok();

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

    let fields = &state.config.security.redacted_fields;
    let request_payload = match &payload {
        Some(p) => Some(audit::redact_payload(p, fields)),
        None if !query.is_empty() => Some(audit::redact_payload(
            &serde_json::to_value(&query).unwrap_or_default(),
            fields,
        )),
        None => None,
    };

    audit::record(
        &state.db,
        NewManagerAction {
            user_id,
            action: audit::action_for(&method, &path).to_string(),
            program_id: program_from(payload.as_ref(), &query),
            target_user_id: audit::target_user_id(&path),
            method,
            path,
            status_code: response.status().as_u16(),
            execution_time_ms: started.elapsed().as_millis() as i64,
            request_payload,
        },
    )
    .await;

    Ok(response)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn program_comes_from_query_then_body() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let query = HashMap::from([("program_id".to_string(), a.to_string())]);
        let body = json!({ "program_id": b.to_string() });

        assert_eq!(program_from(Some(&body), &query), Some(a));
        assert_eq!(program_from(Some(&body), &HashMap::new()), Some(b));
        assert_eq!(program_from(None, &HashMap::new()), None);
    }
}
