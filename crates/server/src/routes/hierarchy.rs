//! Manager/subordinate hierarchy endpoints.
//!
//! Every route under `/hierarchy` is audited. Routes addressing a manager or a team member
//! by id also pass the data-scope check, and team notifications are rate limited.

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use db::models::{
    hierarchy_change_log::{ChangeLogFilter, HierarchyChangeLog},
    manager_dashboard_access::{ManagerDashboardAccess, UpdateDashboardAccess},
    user::User,
    user_role_hierarchy::{HierarchyMember, UserRoleHierarchy},
};
use serde::{Deserialize, Serialize};
use services::services::{
    hierarchy::{
        AssignManagerRequest, AssignmentValidation, HierarchyAction, HierarchyNode,
        ManagerAssignment, RemoveManagerRequest, Subordinate, TeamStatistics, UserHierarchyInfo,
        team_statistics,
    },
    notification::{SendTeamNotification, TeamNotificationReport},
    program_scope::ProgramScope,
};
use tracing::warn;
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::{
        audit::audit_manager_actions,
        ensure_in_scope, ensure_user_in_scope,
        permission::{PROGRAM_STAFF, USER_ADMINS},
        rate_limit::limit_notifications,
        require_roles, validate_data_scope,
    },
    state::AppState,
};

#[derive(Debug, Default, Deserialize, TS)]
pub struct ProgramQuery {
    pub program_id: Option<Uuid>,
}

#[derive(Debug, Serialize, TS)]
pub struct TeamAnalytics {
    pub manager_id: Uuid,
    pub program_id: Uuid,
    pub statistics: TeamStatistics,
    pub members: Vec<Subordinate>,
}

/// Program a request is about: the caller's scope, else the requested one, else `fallback`.
fn resolve_program(
    scope: &ProgramScope,
    requested: Option<Uuid>,
    fallback: Option<Uuid>,
) -> Result<Uuid, ApiError> {
    scope
        .filter(requested)
        .or(fallback)
        .ok_or_else(|| ApiError::Validation("program_id is required".to_string()))
}

async fn manager_program(
    state: &AppState,
    scope: &ProgramScope,
    requested: Option<Uuid>,
    manager_id: Uuid,
) -> Result<Uuid, ApiError> {
    if let Some(program_id) = scope.filter(requested) {
        return Ok(program_id);
    }
    let manager = User::find_by_id(&state.db.pool, manager_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Manager not found".to_string()))?;
    resolve_program(scope, None, manager.program_id)
}

async fn ensure_program_access(
    state: &AppState,
    user: &User,
    program_id: Uuid,
) -> Result<(), ApiError> {
    if state.hierarchy.can_access_program(user, program_id).await? {
        Ok(())
    } else {
        warn!(user_id = %user.id, program_id = %program_id, "Program access denied");
        Err(ApiError::Forbidden(
            "You do not have access to this program".to_string(),
        ))
    }
}

async fn ensure_hierarchy_permission(
    state: &AppState,
    user: &User,
    action: HierarchyAction,
) -> Result<(), ApiError> {
    if state.hierarchy.has_hierarchy_permission(user, action).await? {
        Ok(())
    } else {
        warn!(user_id = %user.id, action = ?action, "Hierarchy permission denied");
        Err(ApiError::Forbidden(
            "You do not have permission to perform this action".to_string(),
        ))
    }
}

/// The caller may see `target` when it is themselves, they bypass scope, or `target`
/// reports to them. Program-scoped callers are held to their program first.
async fn ensure_can_view_user(
    state: &AppState,
    user: &User,
    scope: &ProgramScope,
    target: Uuid,
    program_id: Option<Uuid>,
) -> Result<(), ApiError> {
    ensure_user_in_scope(state, user, scope, target).await?;
    if user.id == target || state.hierarchy.bypasses_scope(user.role) {
        return Ok(());
    }
    if state
        .hierarchy
        .is_user_in_manager_chain(user.id, target, program_id)
        .await?
    {
        return Ok(());
    }
    Err(ApiError::Forbidden(
        "This user is not a member of your team".to_string(),
    ))
}

/// Dashboard switches only restrict once a row exists for the manager and program.
async fn dashboard_allows(
    state: &AppState,
    manager_id: Uuid,
    program_id: Uuid,
    switch: fn(&ManagerDashboardAccess) -> bool,
) -> Result<bool, ApiError> {
    Ok(ManagerDashboardAccess::find(&state.db.pool, manager_id, program_id)
        .await?
        .is_none_or(|access| switch(&access)))
}

async fn ensure_can_modify(
    state: &AppState,
    user: &User,
    scope: &ProgramScope,
    program_id: Uuid,
) -> Result<(), ApiError> {
    ensure_in_scope(scope, program_id)?;
    ensure_program_access(state, user, program_id).await?;
    ensure_hierarchy_permission(state, user, HierarchyAction::ModifyStructure).await
}

pub async fn assign_manager(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Json(payload): Json<AssignManagerRequest>,
) -> Result<ResponseJson<ApiResponse<ManagerAssignment>>, ApiError> {
    ensure_can_modify(&state, &user, &scope, payload.program_id).await?;
    let assignment = state.hierarchy.assign_manager(&payload, user.id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        assignment,
        "Manager assigned successfully",
    )))
}

/// PUT variant of assignment: always replaces an existing manager.
pub async fn update_manager(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Json(mut payload): Json<AssignManagerRequest>,
) -> Result<ResponseJson<ApiResponse<ManagerAssignment>>, ApiError> {
    ensure_can_modify(&state, &user, &scope, payload.program_id).await?;
    payload.replace_existing = true;
    let assignment = state.hierarchy.assign_manager(&payload, user.id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        assignment,
        "Manager updated successfully",
    )))
}

pub async fn remove_manager(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Json(payload): Json<RemoveManagerRequest>,
) -> Result<ResponseJson<ApiResponse<UserRoleHierarchy>>, ApiError> {
    ensure_can_modify(&state, &user, &scope, payload.program_id).await?;
    let hierarchy = state.hierarchy.remove_manager(&payload, user.id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        hierarchy,
        "Manager removed successfully",
    )))
}

pub async fn validate_assignment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Json(payload): Json<AssignManagerRequest>,
) -> Result<ResponseJson<ApiResponse<AssignmentValidation>>, ApiError> {
    ensure_in_scope(&scope, payload.program_id)?;
    ensure_program_access(&state, &user, payload.program_id).await?;
    let validation = state.hierarchy.validate_assignment(&payload).await?;
    Ok(ResponseJson(ApiResponse::success(validation)))
}

pub async fn hierarchy_tree(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(program_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<HierarchyNode>>>, ApiError> {
    ensure_program_access(&state, &user, program_id).await?;
    let tree = state.hierarchy.hierarchy_tree(program_id).await?;
    Ok(ResponseJson(ApiResponse::success(tree)))
}

pub async fn user_info(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ProgramQuery>,
) -> Result<ResponseJson<ApiResponse<UserHierarchyInfo>>, ApiError> {
    let program_id = scope.filter(query.program_id);
    ensure_can_view_user(&state, &user, &scope, user_id, program_id).await?;
    let info = state.hierarchy.user_info(user_id, program_id).await?;
    Ok(ResponseJson(ApiResponse::success(info)))
}

pub async fn user_subordinates(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ProgramQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Subordinate>>>, ApiError> {
    let program_id = manager_program(&state, &scope, query.program_id, user_id).await?;
    ensure_can_view_user(&state, &user, &scope, user_id, Some(program_id)).await?;
    let subordinates = state.hierarchy.all_subordinates(user_id, program_id).await?;
    Ok(ResponseJson(ApiResponse::success(subordinates)))
}

pub async fn manager_team(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(manager_id): Path<Uuid>,
    Query(query): Query<ProgramQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<HierarchyMember>>>, ApiError> {
    let program_id = manager_program(&state, &scope, query.program_id, manager_id).await?;
    let team = state.hierarchy.manager_team(manager_id, program_id).await?;
    Ok(ResponseJson(ApiResponse::success(team)))
}

pub async fn manager_statistics(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Path(manager_id): Path<Uuid>,
    Query(query): Query<ProgramQuery>,
) -> Result<ResponseJson<ApiResponse<TeamStatistics>>, ApiError> {
    let program_id = manager_program(&state, &scope, query.program_id, manager_id).await?;
    let statistics = state.hierarchy.team_statistics(manager_id, program_id).await?;
    Ok(ResponseJson(ApiResponse::success(statistics)))
}

pub async fn manager_analytics(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Path(manager_id): Path<Uuid>,
    Query(query): Query<ProgramQuery>,
) -> Result<ResponseJson<ApiResponse<TeamAnalytics>>, ApiError> {
    ensure_hierarchy_permission(&state, &user, HierarchyAction::ViewAnalytics).await?;
    let program_id = manager_program(&state, &scope, query.program_id, manager_id).await?;
    if !dashboard_allows(&state, manager_id, program_id, |a| a.can_view_team_analytics).await? {
        return Err(ApiError::Forbidden(
            "Team analytics are disabled for this manager".to_string(),
        ));
    }

    let members = state.hierarchy.all_subordinates(manager_id, program_id).await?;
    let statistics = team_statistics(&members);
    Ok(ResponseJson(ApiResponse::success(TeamAnalytics {
        manager_id,
        program_id,
        statistics,
        members,
    })))
}

pub async fn send_team_notification(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Path(manager_id): Path<Uuid>,
    Json(mut payload): Json<SendTeamNotification>,
) -> Result<ResponseJson<ApiResponse<TeamNotificationReport>>, ApiError> {
    ensure_hierarchy_permission(&state, &user, HierarchyAction::SendNotifications).await?;
    let program_id = manager_program(&state, &scope, payload.program_id, manager_id).await?;
    ensure_in_scope(&scope, program_id)?;
    if !dashboard_allows(&state, manager_id, program_id, |a| a.can_send_notifications).await? {
        return Err(ApiError::Forbidden(
            "Team notifications are disabled for this manager".to_string(),
        ));
    }

    payload.program_id = Some(program_id);
    let report = state
        .notifications
        .send_team_notification(&user, manager_id, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        report,
        "Notification sent successfully",
    )))
}

pub async fn team_member_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(scope): Extension<ProgramScope>,
    Path(member_id): Path<Uuid>,
    Query(query): Query<ProgramQuery>,
) -> Result<ResponseJson<ApiResponse<UserHierarchyInfo>>, ApiError> {
    ensure_hierarchy_permission(&state, &user, HierarchyAction::ViewTeamProfiles).await?;
    let info = state
        .hierarchy
        .user_info(member_id, scope.filter(query.program_id))
        .await?;
    Ok(ResponseJson(ApiResponse::success(info)))
}

pub async fn change_logs(
    State(state): State<AppState>,
    Extension(scope): Extension<ProgramScope>,
    Query(mut filter): Query<ChangeLogFilter>,
) -> Result<ResponseJson<ApiResponse<Vec<HierarchyChangeLog>>>, ApiError> {
    filter.program_id = scope.filter(filter.program_id);
    let logs = state.hierarchy.change_logs(&filter).await?;
    Ok(ResponseJson(ApiResponse::success(logs)))
}

pub async fn get_dashboard_access(
    State(state): State<AppState>,
    Path((manager_id, program_id)): Path<(Uuid, Uuid)>,
) -> Result<ResponseJson<ApiResponse<Option<ManagerDashboardAccess>>>, ApiError> {
    let access = ManagerDashboardAccess::find(&state.db.pool, manager_id, program_id).await?;
    Ok(ResponseJson(ApiResponse::success(access)))
}

pub async fn update_dashboard_access(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((manager_id, program_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateDashboardAccess>,
) -> Result<ResponseJson<ApiResponse<ManagerDashboardAccess>>, ApiError> {
    ensure_program_access(&state, &user, program_id).await?;
    let access =
        ManagerDashboardAccess::upsert(&state.db.pool, manager_id, program_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(access)))
}

pub fn router(state: &AppState) -> Router<AppState> {
    let scoped = from_fn_with_state(state.clone(), validate_data_scope);

    let managers = Router::new()
        .route("/{manager_id}/team", get(manager_team))
        .route("/{manager_id}/statistics", get(manager_statistics))
        .route("/{manager_id}/analytics", get(manager_analytics))
        .route(
            "/{manager_id}/notifications",
            post(send_team_notification)
                .route_layer(from_fn_with_state(state.clone(), limit_notifications)),
        )
        .route_layer(scoped.clone());

    let hierarchy = Router::new()
        .route(
            "/assign-manager",
            post(assign_manager).put(update_manager),
        )
        .route("/remove-manager", post(remove_manager))
        .route("/validate-assignment", post(validate_assignment))
        .route("/programs/{program_id}/tree", get(hierarchy_tree))
        .route("/users/{user_id}/info", get(user_info))
        .route("/users/{user_id}/subordinates", get(user_subordinates))
        .route(
            "/team-members/{member_id}",
            get(team_member_profile).route_layer(scoped.clone()),
        )
        .route(
            "/change-logs",
            get(change_logs).route_layer(from_fn_with_state(PROGRAM_STAFF, require_roles)),
        )
        .nest("/managers", managers)
        .layer(from_fn_with_state(state.clone(), audit_manager_actions));

    Router::new()
        .nest("/hierarchy", hierarchy)
        .route(
            "/manager-dashboard-access/{manager_id}/programs/{program_id}",
            get(get_dashboard_access).route_layer(scoped),
        )
        .route(
            "/manager-dashboard-access/{manager_id}/programs/{program_id}",
            put(update_dashboard_access)
                .route_layer(from_fn_with_state(USER_ADMINS, require_roles)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_callers_cannot_pick_another_program() {
        let own = Uuid::new_v4();
        let other = Uuid::new_v4();
        let scope = ProgramScope::Program(own);
        assert_eq!(resolve_program(&scope, Some(other), None).unwrap(), own);
        assert_eq!(
            resolve_program(&ProgramScope::Unscoped, Some(other), Some(own)).unwrap(),
            other
        );
        assert!(resolve_program(&ProgramScope::Unscoped, None, None).is_err());
    }
}
