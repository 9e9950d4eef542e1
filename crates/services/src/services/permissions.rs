//! Resource/action permissions: per-user overrides first, then the role matrix, else deny.

use db::{
    DBService,
    models::user::{PermissionOverrides, User, UserRole},
};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, info};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Resource {
    Organizations,
    Programs,
    Questionnaires,
    Activities,
    Evaluation,
    Reports,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Export,
}

impl Action {
    fn bit(self) -> u8 {
        match self {
            Self::View => 0b00001,
            Self::Create => 0b00010,
            Self::Edit => 0b00100,
            Self::Delete => 0b01000,
            Self::Export => 0b10000,
        }
    }
}

const NONE: u8 = 0;
const VIEW: u8 = 0b00001;
const EDIT: u8 = 0b00100;
const EXPORT: u8 = 0b10000;
const ALL: u8 = 0b11111;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Override,
    Role,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub source: DecisionSource,
}

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Only super-admin can modify permissions")]
    NotSuperAdmin,
    #[error("Cannot grant organization management to a non-admin role")]
    ProtectedPermission,
    #[error("user not found")]
    UserNotFound,
}

/// Allowed actions of `role` on `resource` as a bitmask.
fn role_mask(role: UserRole, resource: Resource) -> u8 {
    use Resource::*;
    match role {
        UserRole::SuperAdmin | UserRole::Admin => ALL,
        UserRole::ProgramAdmin => match resource {
            Organizations => NONE,
            _ => ALL,
        },
        UserRole::EvaluationAdmin => match resource {
            Organizations | Programs => VIEW,
            Questionnaires | Activities | Evaluation => ALL,
            Reports => VIEW | EXPORT,
        },
        UserRole::ProgramManager => match resource {
            Organizations => NONE,
            Programs => VIEW | EDIT,
            Questionnaires | Activities | Evaluation => VIEW | EDIT | EXPORT,
            Reports => VIEW | EXPORT,
        },
        UserRole::ProgramModerator => match resource {
            Organizations => NONE,
            Reports => VIEW | EXPORT,
            _ => VIEW,
        },
        UserRole::GroupHead | UserRole::SystemUser | UserRole::Participant => NONE,
    }
}

pub fn role_allows(role: UserRole, resource: Resource, action: Action) -> bool {
    role_mask(role, resource) & action.bit() != 0
}

/// Resolve a permission for a user: override, then role matrix, then deny.
pub fn check(user: &User, resource: Resource, action: Action) -> PermissionDecision {
    let override_value = user
        .overrides()
        .and_then(|o| o.get(&resource.to_string()))
        .and_then(|actions| actions.get(&action.to_string()))
        .copied();

    let decision = match override_value {
        Some(allowed) => PermissionDecision {
            allowed,
            source: DecisionSource::Override,
        },
        None if role_allows(user.role, resource, action) => PermissionDecision {
            allowed: true,
            source: DecisionSource::Role,
        },
        None => PermissionDecision {
            allowed: false,
            source: DecisionSource::Default,
        },
    };

    debug!(
        user_id = %user.id,
        resource = %resource,
        action = %action,
        allowed = decision.allowed,
        source = ?decision.source,
        "Permission check"
    );
    decision
}

/// Full matrix for a user, for the frontend.
pub fn effective_permissions(user: &User) -> PermissionOverrides {
    let resources = [
        Resource::Organizations,
        Resource::Programs,
        Resource::Questionnaires,
        Resource::Activities,
        Resource::Evaluation,
        Resource::Reports,
    ];
    let actions = [Action::View, Action::Create, Action::Edit, Action::Delete, Action::Export];

    resources
        .iter()
        .map(|&resource| {
            let row = actions
                .iter()
                .map(|&action| (action.to_string(), check(user, resource, action).allowed))
                .collect();
            (resource.to_string(), row)
        })
        .collect()
}

pub struct PermissionService;

impl PermissionService {
    pub async fn set_override(
        db: &DBService,
        actor: &User,
        target_id: Uuid,
        resource: Resource,
        action: Action,
        allowed: bool,
    ) -> Result<User, PermissionError> {
        if actor.role != UserRole::SuperAdmin {
            return Err(PermissionError::NotSuperAdmin);
        }
        let target = User::find_by_id(&db.pool, target_id)
            .await?
            .ok_or(PermissionError::UserNotFound)?;
        if allowed
            && resource == Resource::Organizations
            && action != Action::View
            && !target.role.is_platform_admin()
        {
            return Err(PermissionError::ProtectedPermission);
        }

        let mut overrides = target.overrides().cloned().unwrap_or_default();
        overrides
            .entry(resource.to_string())
            .or_default()
            .insert(action.to_string(), allowed);

        let updated = User::set_permission_overrides(&db.pool, target_id, Some(&overrides))
            .await?
            .ok_or(PermissionError::UserNotFound)?;
        info!(
            user_id = %target_id,
            changed_by = %actor.id,
            resource = %resource,
            action = %action,
            allowed,
            "Permission override set"
        );
        Ok(updated)
    }

    pub async fn remove_override(
        db: &DBService,
        actor: &User,
        target_id: Uuid,
        resource: Resource,
        action: Action,
    ) -> Result<User, PermissionError> {
        if actor.role != UserRole::SuperAdmin {
            return Err(PermissionError::NotSuperAdmin);
        }
        let target = User::find_by_id(&db.pool, target_id)
            .await?
            .ok_or(PermissionError::UserNotFound)?;

        let mut overrides = target.overrides().cloned().unwrap_or_default();
        let key = resource.to_string();
        if let Some(actions) = overrides.get_mut(&key) {
            actions.remove(&action.to_string());
            if actions.is_empty() {
                overrides.remove(&key);
            }
        }
        let stored = (!overrides.is_empty()).then_some(&overrides);

        let updated = User::set_permission_overrides(&db.pool, target_id, stored)
            .await?
            .ok_or(PermissionError::UserNotFound)?;
        info!(user_id = %target_id, changed_by = %actor.id, resource = %resource, action = %action, "Permission override removed");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support;

    #[test]
    fn role_matrix() {
        assert!(role_allows(UserRole::Admin, Resource::Organizations, Action::Delete));
        assert!(!role_allows(UserRole::ProgramAdmin, Resource::Organizations, Action::View));
        assert!(role_allows(UserRole::ProgramAdmin, Resource::Evaluation, Action::Create));
        assert!(role_allows(UserRole::ProgramManager, Resource::Programs, Action::Edit));
        assert!(!role_allows(UserRole::ProgramManager, Resource::Programs, Action::Create));
        assert!(role_allows(UserRole::ProgramModerator, Resource::Reports, Action::Export));
        assert!(!role_allows(UserRole::ProgramModerator, Resource::Evaluation, Action::Edit));
        assert!(role_allows(UserRole::EvaluationAdmin, Resource::Reports, Action::Export));
        assert!(!role_allows(UserRole::EvaluationAdmin, Resource::Reports, Action::Edit));
        assert!(!role_allows(UserRole::Participant, Resource::Reports, Action::View));
    }

    #[tokio::test]
    async fn overrides_take_precedence_and_only_super_admin_sets_them() {
        let db = test_support::db().await;
        let root = test_support::user(&db, "Root", UserRole::SuperAdmin, None).await;
        let admin = test_support::user(&db, "Admin", UserRole::Admin, None).await;
        let moderator = test_support::user(&db, "Mod", UserRole::ProgramModerator, None).await;

        assert_eq!(
            check(&moderator, Resource::Evaluation, Action::Edit),
            PermissionDecision {
                allowed: false,
                source: DecisionSource::Default
            }
        );

        let err = PermissionService::set_override(
            &db,
            &admin,
            moderator.id,
            Resource::Evaluation,
            Action::Edit,
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PermissionError::NotSuperAdmin));

        let updated = PermissionService::set_override(
            &db,
            &root,
            moderator.id,
            Resource::Evaluation,
            Action::Edit,
            true,
        )
        .await
        .unwrap();
        assert_eq!(
            check(&updated, Resource::Evaluation, Action::Edit).source,
            DecisionSource::Override
        );
        assert!(check(&updated, Resource::Evaluation, Action::Edit).allowed);

        // overrides can also deny what the role grants
        let updated = PermissionService::set_override(
            &db,
            &root,
            moderator.id,
            Resource::Reports,
            Action::View,
            false,
        )
        .await
        .unwrap();
        assert!(!check(&updated, Resource::Reports, Action::View).allowed);

        let err = PermissionService::set_override(
            &db,
            &root,
            moderator.id,
            Resource::Organizations,
            Action::Create,
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PermissionError::ProtectedPermission));

        PermissionService::remove_override(&db, &root, moderator.id, Resource::Reports, Action::View)
            .await
            .unwrap();
        let cleared = PermissionService::remove_override(
            &db,
            &root,
            moderator.id,
            Resource::Evaluation,
            Action::Edit,
        )
        .await
        .unwrap();
        assert!(cleared.overrides().is_none());
        assert_eq!(
            check(&cleared, Resource::Reports, Action::View).source,
            DecisionSource::Role
        );
    }

    #[tokio::test]
    async fn effective_permissions_cover_every_resource() {
        let db = test_support::db().await;
        let manager = test_support::user(&db, "Pm", UserRole::ProgramManager, None).await;
        let matrix = effective_permissions(&manager);
        assert_eq!(matrix.len(), 6);
        assert_eq!(matrix["programs"]["edit"], true);
        assert_eq!(matrix["organizations"]["view"], false);
    }
}
