//! Program scoping for program-level roles.
//!
//! `program-admin`, `program-manager` and `program-moderator` accounts only ever see data of
//! the program on their account. The check is a pure function of the caller's role and
//! program plus the program ids named by the request.

use db::models::user::UserRole;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Effective program filter for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "program_id", rename_all = "snake_case")]
pub enum ProgramScope {
    Unscoped,
    Program(Uuid),
}

impl ProgramScope {
    pub fn program_id(&self) -> Option<Uuid> {
        match self {
            Self::Unscoped => None,
            Self::Program(id) => Some(*id),
        }
    }

    pub fn allows(&self, program_id: Uuid) -> bool {
        match self {
            Self::Unscoped => true,
            Self::Program(id) => *id == program_id,
        }
    }

    /// Program filter to apply when listing: the scoped program, else whatever was requested.
    pub fn filter(&self, requested: Option<Uuid>) -> Option<Uuid> {
        self.program_id().or(requested)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeViolation {
    #[error("Your account is not assigned to any program. Please contact an administrator.")]
    ProgramNotAssigned,
    #[error("You can only access data within your assigned program")]
    QueryProgramMismatch { assigned: Uuid },
    #[error("You can only access data within your assigned program")]
    RouteProgramMismatch { assigned: Uuid },
}

impl ScopeViolation {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProgramNotAssigned => "PROGRAM_NOT_ASSIGNED",
            Self::QueryProgramMismatch { .. } | Self::RouteProgramMismatch { .. } => {
                "PROGRAM_SCOPE_VIOLATION"
            }
        }
    }
}

fn same_program(raw: &str, assigned: Uuid) -> bool {
    raw.trim().parse::<Uuid>().is_ok_and(|id| id == assigned)
}

/// Decide the request's program scope.
///
/// `query_program` and `route_program` are the raw `program_id` values from the query string
/// and the route; values that are not a UUID never match.
pub fn resolve_scope(
    role: UserRole,
    user_program: Option<Uuid>,
    query_program: Option<&str>,
    route_program: Option<&str>,
) -> Result<ProgramScope, ScopeViolation> {
    if !role.is_program_scoped() {
        return Ok(ProgramScope::Unscoped);
    }
    let assigned = user_program.ok_or(ScopeViolation::ProgramNotAssigned)?;

    if let Some(raw) = query_program.filter(|v| !v.trim().is_empty()) {
        if !same_program(raw, assigned) {
            return Err(ScopeViolation::QueryProgramMismatch { assigned });
        }
    }
    if let Some(raw) = route_program {
        if !same_program(raw, assigned) {
            return Err(ScopeViolation::RouteProgramMismatch { assigned });
        }
    }

    Ok(ProgramScope::Program(assigned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscoped_roles_pass_untouched() {
        let other = Uuid::new_v4().to_string();
        for role in [UserRole::SuperAdmin, UserRole::Admin, UserRole::Participant] {
            assert_eq!(
                resolve_scope(role, None, Some(&other), Some(&other)),
                Ok(ProgramScope::Unscoped)
            );
        }
    }

    #[test]
    fn scoped_role_without_program_is_rejected() {
        let err = resolve_scope(UserRole::ProgramManager, None, None, None).unwrap_err();
        assert_eq!(err, ScopeViolation::ProgramNotAssigned);
        assert_eq!(err.code(), "PROGRAM_NOT_ASSIGNED");
    }

    #[test]
    fn scoped_role_cannot_name_another_program() {
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4().to_string();

        let err = resolve_scope(UserRole::ProgramAdmin, Some(mine), Some(&other), None).unwrap_err();
        assert_eq!(err.code(), "PROGRAM_SCOPE_VIOLATION");

        let err =
            resolve_scope(UserRole::ProgramModerator, Some(mine), None, Some(&other)).unwrap_err();
        assert!(matches!(err, ScopeViolation::RouteProgramMismatch { .. }));

        let err = resolve_scope(UserRole::ProgramAdmin, Some(mine), Some("junk"), None).unwrap_err();
        assert!(matches!(err, ScopeViolation::QueryProgramMismatch { .. }));
    }

    #[test]
    fn scoped_role_gets_its_program_injected() {
        let mine = Uuid::new_v4();
        let scope = resolve_scope(
            UserRole::ProgramManager,
            Some(mine),
            Some(&mine.to_string()),
            None,
        )
        .unwrap();
        assert_eq!(scope, ProgramScope::Program(mine));
        assert_eq!(scope.filter(Some(Uuid::new_v4())), Some(mine));
        assert!(!scope.allows(Uuid::new_v4()));

        let scope = resolve_scope(UserRole::ProgramManager, Some(mine), None, None).unwrap();
        assert_eq!(scope.program_id(), Some(mine));
    }
}
