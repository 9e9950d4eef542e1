use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use services::services::{
    auth::AuthError,
    database_validator::DatabaseValidationError,
    evaluation::EvaluationError,
    hierarchy::HierarchyError,
    notification::NotificationError,
    permissions::PermissionError,
    program_scope::ScopeViolation,
    questionnaire::QuestionnaireError,
    rate_limit::RateLimitRejection,
    reminders::ReminderError,
    sendgrid::SendGridError,
};
use thiserror::Error;
use tracing::error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Questionnaire(#[from] QuestionnaireError),
    #[error(transparent)]
    Notification(#[from] NotificationError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Reminder(#[from] ReminderError),
    #[error(transparent)]
    SendGrid(#[from] SendGridError),
    #[error(transparent)]
    DatabaseValidation(#[from] DatabaseValidationError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Scope(#[from] ScopeViolation),
    #[error(transparent)]
    RateLimited(#[from] RateLimitRejection),
    #[error("Unauthenticated")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
}

fn hierarchy_status(e: &HierarchyError) -> StatusCode {
    match e {
        HierarchyError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        HierarchyError::UserNotFound
        | HierarchyError::ManagerNotFound
        | HierarchyError::ProgramNotFound
        | HierarchyError::RoleNotFound
        | HierarchyError::NoManagerAssigned => StatusCode::NOT_FOUND,
        HierarchyError::AlreadyManaged { .. } => StatusCode::CONFLICT,
        HierarchyError::RoleRequired
        | HierarchyError::SelfManagement
        | HierarchyError::ManagerNotInProgram
        | HierarchyError::ManagerRoleNotManager
        | HierarchyError::CircularReference
        | HierarchyError::DepthExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn evaluation_status(e: &EvaluationError) -> StatusCode {
    match e {
        EvaluationError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EvaluationError::EventNotFound
        | EvaluationError::AssignmentNotFound
        | EvaluationError::ProgramNotFound
        | EvaluationError::QuestionnaireNotFound => StatusCode::NOT_FOUND,
        EvaluationError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EvaluationError::InvalidTransition { .. }
        | EvaluationError::NotEditable { .. }
        | EvaluationError::GenerationNotAllowed { .. }
        | EvaluationError::EventNotOpen { .. }
        | EvaluationError::AssignmentClosed { .. } => StatusCode::CONFLICT,
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Hierarchy(e) => hierarchy_status(e),
            ApiError::Evaluation(e) => evaluation_status(e),
            ApiError::Questionnaire(e) => match e {
                QuestionnaireError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
                QuestionnaireError::NotFound | QuestionnaireError::ProgramNotFound => {
                    StatusCode::NOT_FOUND
                }
                QuestionnaireError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            },
            ApiError::Notification(e) => match e {
                NotificationError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
                NotificationError::Hierarchy(inner) => hierarchy_status(inner),
                NotificationError::Validation(_)
                | NotificationError::NoRecipients
                | NotificationError::UnknownRecipients { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                NotificationError::ManagerNotFound | NotificationError::NotFound => {
                    StatusCode::NOT_FOUND
                }
                NotificationError::RecipientsOutsideTeam { .. }
                | NotificationError::RecipientsOutsideProgram { .. } => StatusCode::FORBIDDEN,
            },
            ApiError::Permission(e) => match e {
                PermissionError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
                PermissionError::NotSuperAdmin | PermissionError::ProtectedPermission => {
                    StatusCode::FORBIDDEN
                }
                PermissionError::UserNotFound => StatusCode::NOT_FOUND,
            },
            ApiError::Auth(e) => match e {
                AuthError::InvalidCredentials | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
                AuthError::AccountInactive => StatusCode::FORBIDDEN,
                AuthError::EmailTaken => StatusCode::CONFLICT,
                AuthError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                AuthError::Database(_) | AuthError::Password(_) | AuthError::Join(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::SendGrid(SendGridError::NotConfigured) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Reminder(_)
            | ApiError::SendGrid(_)
            | ApiError::DatabaseValidation(_)
            | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Scope(_) | ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::RateLimited(RateLimitRejection::TooManyRecipients { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Machine-readable detail placed in the envelope's `error` field.
    fn detail(&self) -> Option<Value> {
        match self {
            ApiError::Scope(v) => Some(json!({ "code": v.code() })),
            ApiError::Questionnaire(QuestionnaireError::Invalid(errors)) => {
                Some(json!({ "errors": errors }))
            }
            ApiError::Evaluation(EvaluationError::InvalidTransition { from, to }) => {
                Some(json!({ "current_status": from, "requested_status": to }))
            }
            ApiError::Hierarchy(HierarchyError::AlreadyManaged { manager_user_id }) => {
                Some(json!({ "current_manager_id": manager_user_id }))
            }
            ApiError::Notification(
                NotificationError::RecipientsOutsideTeam { user_ids }
                | NotificationError::RecipientsOutsideProgram { user_ids },
            ) => Some(json!({ "invalid_recipients": user_ids })),
            ApiError::Notification(NotificationError::UnknownRecipients { user_ids }) => {
                Some(json!({ "unknown_recipients": user_ids }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            let body = ApiResponse::<()>::error("An internal error occurred");
            return (status, Json(body)).into_response();
        }

        // limit hits carry the window in a top-level `rate_limit` object
        if let ApiError::RateLimited(
            RateLimitRejection::HourlyExceeded {
                limit,
                reset_in_seconds,
            }
            | RateLimitRejection::DailyExceeded {
                limit,
                reset_in_seconds,
            },
        ) = &self
        {
            let body = json!({
                "success": false,
                "message": self.to_string(),
                "rate_limit": {
                    "limit": limit,
                    "remaining": 0,
                    "reset_in_seconds": reset_in_seconds,
                },
            });
            return (status, Json(body)).into_response();
        }

        let message = self.to_string();
        let body = match self.detail() {
            Some(detail) => ApiResponse::<()>::error_with_data(message, detail),
            None => ApiResponse::<()>::error(message),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_errors_to_statuses() {
        assert_eq!(
            ApiError::from(HierarchyError::SelfManagement).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(HierarchyError::AlreadyManaged {
                manager_user_id: uuid::Uuid::new_v4()
            }).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(NotificationError::Hierarchy(HierarchyError::UserNotFound)).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RateLimitRejection::TooManyRecipients {
                max: 100,
                requested: 101
            })
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(NotificationError::UnknownRecipients { user_ids: vec![] }).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(NotificationError::RecipientsOutsideProgram { user_ids: vec![] })
                .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(AuthError::InvalidToken).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn scope_violations_expose_their_code() {
        let detail = ApiError::from(ScopeViolation::ProgramNotAssigned).detail();
        assert_eq!(detail, Some(json!({ "code": "PROGRAM_NOT_ASSIGNED" })));
    }
}
