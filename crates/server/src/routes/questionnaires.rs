use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{delete, get, post, put},
};
use db::models::{
    questionnaire::{CreateQuestionnaire, Questionnaire, UpdateQuestionnaire},
    user::User,
};
use serde::Deserialize;
use services::services::{
    permissions::{Action, Resource},
    program_scope::ProgramScope,
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
pub struct QuestionnaireQuery {
    pub program_id: Option<Uuid>,
}

async fn scoped_questionnaire(
    state: &AppState,
    scope: &ProgramScope,
    id: Uuid,
) -> Result<Questionnaire, ApiError> {
    let questionnaire = state.questionnaires.get(id).await?;
    ensure_in_scope(scope, questionnaire.program_id)?;
    Ok(questionnaire)
}

pub async fn list_questionnaires(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Query(query): Query<QuestionnaireQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Questionnaire>>>, ApiError> {
    let questionnaires = state
        .questionnaires
        .list(scope.filter(query.program_id))
        .await?;
    Ok(ResponseJson(ApiResponse::success(questionnaires)))
}

pub async fn create_questionnaire(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Json(payload): Json<CreateQuestionnaire>,
) -> Result<ResponseJson<ApiResponse<Questionnaire>>, ApiError> {
    ensure_in_scope(&scope, payload.program_id)?;
    let questionnaire = state.questionnaires.create(&payload, user.id).await?;
    Ok(ResponseJson(ApiResponse::success(questionnaire)))
}

pub async fn get_questionnaire(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(questionnaire_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Questionnaire>>, ApiError> {
    let questionnaire = scoped_questionnaire(&state, &scope, questionnaire_id).await?;
    Ok(ResponseJson(ApiResponse::success(questionnaire)))
}

pub async fn update_questionnaire(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(questionnaire_id): Path<Uuid>,
    Json(payload): Json<UpdateQuestionnaire>,
) -> Result<ResponseJson<ApiResponse<Questionnaire>>, ApiError> {
    scoped_questionnaire(&state, &scope, questionnaire_id).await?;
    let questionnaire = state
        .questionnaires
        .update(questionnaire_id, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success(questionnaire)))
}

pub async fn delete_questionnaire(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(questionnaire_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    scoped_questionnaire(&state, &scope, questionnaire_id).await?;
    state.questionnaires.delete(questionnaire_id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        "Questionnaire deleted successfully",
    )))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/questionnaires",
            get(list_questionnaires).route_layer(from_fn_with_state(
                (Resource::Questionnaires, Action::View),
                require_permission,
            )),
        )
        .route(
            "/questionnaires",
            post(create_questionnaire).route_layer(from_fn_with_state(
                (Resource::Questionnaires, Action::Create),
                require_permission,
            )),
        )
        .route(
            "/questionnaires/{questionnaire_id}",
            get(get_questionnaire).route_layer(from_fn_with_state(
                (Resource::Questionnaires, Action::View),
                require_permission,
            )),
        )
        .route(
            "/questionnaires/{questionnaire_id}",
            put(update_questionnaire).route_layer(from_fn_with_state(
                (Resource::Questionnaires, Action::Edit),
                require_permission,
            )),
        )
        .route(
            "/questionnaires/{questionnaire_id}",
            delete(delete_questionnaire).route_layer(from_fn_with_state(
                (Resource::Questionnaires, Action::Delete),
                require_permission,
            )),
        )
}
