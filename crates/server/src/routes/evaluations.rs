use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{delete, get, post, put},
};
use db::models::{
    evaluation_assignment::{AssignmentStatus, EvaluationAssignment, MyAssignment},
    evaluation_event::{
        CreateEvaluationEvent, EvaluationEvent, EvaluationStatus, UpdateEvaluationEvent,
    },
    user::User,
};
use serde::Deserialize;
use services::services::{
    evaluation::{EventSummary, GenerationReport},
    permissions::{Action, Resource},
    program_scope::ProgramScope,
    reminders::JobReport,
};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::{ensure_in_scope, require_permission},
    state::AppState,
};

#[derive(Debug, Default, Deserialize, TS)]
pub struct EventListQuery {
    pub program_id: Option<Uuid>,
    pub status: Option<EvaluationStatus>,
}

#[derive(Debug, Default, Deserialize, TS)]
pub struct AssignmentListQuery {
    pub status: Option<AssignmentStatus>,
}

#[derive(Debug, Deserialize, TS)]
pub struct SubmitEvaluation {
    #[ts(type = "Record<string, unknown>")]
    pub responses: serde_json::Value,
}

/// Loads an event the caller's program scope covers.
async fn scoped_event(
    state: &AppState,
    scope: &ProgramScope,
    event_id: Uuid,
) -> Result<EvaluationEvent, ApiError> {
    let event = state.evaluations.get(event_id).await?;
    ensure_in_scope(scope, event.program_id)?;
    Ok(event)
}

async fn scoped_assignment(
    state: &AppState,
    scope: &ProgramScope,
    assignment_id: Uuid,
) -> Result<EvaluationAssignment, ApiError> {
    let assignment = EvaluationAssignment::find_by_id(&state.db.pool, assignment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Evaluation assignment not found".to_string()))?;
    scoped_event(state, scope, assignment.evaluation_event_id).await?;
    Ok(assignment)
}

pub async fn list_events(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Query(query): Query<EventListQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<EvaluationEvent>>>, ApiError> {
    let events = state
        .evaluations
        .list(scope.filter(query.program_id), query.status)
        .await?;
    Ok(ResponseJson(ApiResponse::success(events)))
}

pub async fn create_event(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Json(payload): Json<CreateEvaluationEvent>,
) -> Result<ResponseJson<ApiResponse<EvaluationEvent>>, ApiError> {
    ensure_in_scope(&scope, payload.program_id)?;
    let event = state.evaluations.create(&payload, user.id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        event,
        "Evaluation created successfully",
    )))
}

pub async fn get_event(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(event_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<EvaluationEvent>>, ApiError> {
    let event = scoped_event(&state, &scope, event_id).await?;
    Ok(ResponseJson(ApiResponse::success(event)))
}

pub async fn update_event(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(event_id): Path<Uuid>,
    Json(payload): Json<UpdateEvaluationEvent>,
) -> Result<ResponseJson<ApiResponse<EvaluationEvent>>, ApiError> {
    scoped_event(&state, &scope, event_id).await?;
    let event = state.evaluations.update(event_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(event)))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(event_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    scoped_event(&state, &scope, event_id).await?;
    state.evaluations.delete(event_id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        "Evaluation deleted successfully",
    )))
}

pub async fn activate_event(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(event_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<EvaluationEvent>>, ApiError> {
    scoped_event(&state, &scope, event_id).await?;
    let event = state.evaluations.activate(event_id).await?;
    Ok(ResponseJson(ApiResponse::success(event)))
}

pub async fn pause_event(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(event_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<EvaluationEvent>>, ApiError> {
    scoped_event(&state, &scope, event_id).await?;
    let event = state.evaluations.pause(event_id).await?;
    Ok(ResponseJson(ApiResponse::success(event)))
}

pub async fn complete_event(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(event_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<EvaluationEvent>>, ApiError> {
    scoped_event(&state, &scope, event_id).await?;
    let event = state.evaluations.complete(event_id).await?;
    Ok(ResponseJson(ApiResponse::success(event)))
}

pub async fn generate_assignments(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(event_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<GenerationReport>>, ApiError> {
    scoped_event(&state, &scope, event_id).await?;
    let report = state.evaluations.generate_assignments(event_id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        report,
        format!("{} assignments created", report.created),
    )))
}

pub async fn send_invitations(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Path(event_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<JobReport>>, ApiError> {
    let event = scoped_event(&state, &scope, event_id).await?;
    if event.status != EvaluationStatus::Active {
        return Err(ApiError::Conflict(
            "Invitations can only be sent for active evaluations".to_string(),
        ));
    }
    let report = state
        .reminders
        .send_invitations(event.id, event.program_id, user.id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

pub async fn event_summary(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(event_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<EventSummary>>, ApiError> {
    scoped_event(&state, &scope, event_id).await?;
    let summary = state.evaluations.summary(event_id).await?;
    Ok(ResponseJson(ApiResponse::success(summary)))
}

pub async fn list_assignments(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<AssignmentListQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<EvaluationAssignment>>>, ApiError> {
    scoped_event(&state, &scope, event_id).await?;
    let assignments = state.evaluations.assignments(event_id, query.status).await?;
    Ok(ResponseJson(ApiResponse::success(assignments)))
}

pub async fn skip_assignment(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(assignment_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<EvaluationAssignment>>, ApiError> {
    scoped_assignment(&state, &scope, assignment_id).await?;
    let assignment = state.evaluations.skip(assignment_id).await?;
    Ok(ResponseJson(ApiResponse::success(assignment)))
}

pub async fn delete_assignment(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(assignment_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    scoped_assignment(&state, &scope, assignment_id).await?;
    state.evaluations.delete_assignment(assignment_id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        "Assignment deleted",
    )))
}

pub async fn my_evaluations(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<ResponseJson<ApiResponse<Vec<MyAssignment>>>, ApiError> {
    let assignments = state.evaluations.my_assignments(user.id).await?;
    Ok(ResponseJson(ApiResponse::success(assignments)))
}

/// Evaluators reach their form by access token, without signing in.
pub async fn start_evaluation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<ResponseJson<ApiResponse<EvaluationAssignment>>, ApiError> {
    let assignment = state.evaluations.start(&token).await?;
    Ok(ResponseJson(ApiResponse::success(assignment)))
}

pub async fn submit_evaluation(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<SubmitEvaluation>,
) -> Result<ResponseJson<ApiResponse<EvaluationAssignment>>, ApiError> {
    let assignment = state
        .evaluations
        .submit(&token, &payload.responses)
        .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        assignment,
        "Evaluation submitted successfully",
    )))
}

pub fn public_router() -> Router<AppState> {
    Router::new().route(
        "/evaluate/{token}",
        get(start_evaluation).post(submit_evaluation),
    )
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/evaluations",
            get(list_events).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::View),
                require_permission,
            )),
        )
        .route(
            "/evaluations",
            post(create_event).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::Create),
                require_permission,
            )),
        )
        .route(
            "/evaluations/{event_id}",
            get(get_event).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::View),
                require_permission,
            )),
        )
        .route(
            "/evaluations/{event_id}",
            put(update_event).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::Edit),
                require_permission,
            )),
        )
        .route(
            "/evaluations/{event_id}",
            delete(delete_event).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::Delete),
                require_permission,
            )),
        )
        .route(
            "/evaluations/{event_id}/activate",
            post(activate_event).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::Edit),
                require_permission,
            )),
        )
        .route(
            "/evaluations/{event_id}/pause",
            post(pause_event).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::Edit),
                require_permission,
            )),
        )
        .route(
            "/evaluations/{event_id}/complete",
            post(complete_event).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::Edit),
                require_permission,
            )),
        )
        .route(
            "/evaluations/{event_id}/generate-assignments",
            post(generate_assignments).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::Create),
                require_permission,
            )),
        )
        .route(
            "/evaluations/{event_id}/send-invitations",
            post(send_invitations).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::Edit),
                require_permission,
            )),
        )
        .route(
            "/evaluations/{event_id}/summary",
            get(event_summary).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::View),
                require_permission,
            )),
        )
        .route(
            "/evaluations/{event_id}/assignments",
            get(list_assignments).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::View),
                require_permission,
            )),
        )
        .route(
            "/evaluation-assignments/{assignment_id}/skip",
            post(skip_assignment).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::Edit),
                require_permission,
            )),
        )
        .route(
            "/evaluation-assignments/{assignment_id}",
            delete(delete_assignment).route_layer(from_fn_with_state(
                (Resource::Evaluation, Action::Delete),
                require_permission,
            )),
        )
        .route("/my-evaluations", get(my_evaluations))
}
