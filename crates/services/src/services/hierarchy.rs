//! Per-program manager/subordinate hierarchy: assignment with cycle detection, traversal
//! and access questions answered from the reporting tree.

use std::collections::{HashMap, HashSet, VecDeque};

use db::{
    DBService,
    models::{
        hierarchical_role::HierarchicalRole,
        hierarchy_change_log::{
            ChangeLogFilter, ChangeType, HierarchyChangeLog, NewHierarchyChange,
        },
        organization::ActiveStatus,
        program::Program,
        user::{User, UserRole},
        user_role_hierarchy::{HierarchyMember, UserRoleHierarchy},
    },
};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{error, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::config::SecurityConfig;

#[derive(Debug, Error)]
pub enum HierarchyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("user not found")]
    UserNotFound,
    #[error("manager not found")]
    ManagerNotFound,
    #[error("program not found")]
    ProgramNotFound,
    #[error("hierarchical role not found")]
    RoleNotFound,
    #[error("a hierarchical role is required for a user without a position in this program")]
    RoleRequired,
    #[error("A user cannot be their own manager")]
    SelfManagement,
    #[error("manager is not part of this program")]
    ManagerNotInProgram,
    #[error("manager's hierarchical role does not allow managing other users")]
    ManagerRoleNotManager,
    #[error("user already has a manager in this program")]
    AlreadyManaged { manager_user_id: Uuid },
    #[error("this assignment would create a circular reporting structure")]
    CircularReference,
    #[error("hierarchy depth would exceed the maximum of {max} levels")]
    DepthExceeded { max: usize },
    #[error("user has no manager in this program")]
    NoManagerAssigned,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct AssignManagerRequest {
    pub user_id: Uuid,
    pub manager_user_id: Uuid,
    pub program_id: Uuid,
    pub hierarchical_role_id: Option<Uuid>,
    pub reason: Option<String>,
    /// Replace an existing manager instead of rejecting the request.
    #[serde(default)]
    pub replace_existing: bool,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct RemoveManagerRequest {
    pub user_id: Uuid,
    pub program_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ManagerAssignment {
    pub hierarchy: UserRoleHierarchy,
    pub change_type: ChangeType,
    pub previous_manager_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AssignmentValidation {
    pub valid: bool,
    pub would_create_circular_reference: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
pub struct Subordinate {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub status: ActiveStatus,
    pub is_manager: bool,
    /// 1 for direct reports.
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct HierarchyNode {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub role_name: String,
    pub role_code: String,
    pub is_manager: bool,
    pub children: Vec<HierarchyNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
pub struct TeamStatistics {
    pub direct_reports: usize,
    pub total_subordinates: usize,
    pub active_members: usize,
    pub inactive_members: usize,
    pub managers: usize,
    pub staff: usize,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UserHierarchyInfo {
    pub user: User,
    pub hierarchy: Option<UserRoleHierarchy>,
    pub manager: Option<User>,
    pub direct_reports: Vec<HierarchyMember>,
    pub depth: usize,
}

/// Actions a manager may take over their team, gated by [`super::config::ManagerPermissions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyAction {
    ViewAnalytics,
    ViewTeamProfiles,
    SendNotifications,
    ExportData,
    AssignActivities,
    ModifyStructure,
}

/// Walk the proposed manager's chain upward and return the child's resulting depth
/// (number of managers above it).
///
/// Fails with `CircularReference` when the walk reaches `child` or revisits a node, and with
/// `DepthExceeded` when the chain is longer than `max_depth`.
pub fn check_manager_chain(
    parents: &HashMap<Uuid, Uuid>,
    child: Uuid,
    proposed_manager: Uuid,
    max_depth: usize,
) -> Result<usize, HierarchyError> {
    let mut visited = HashSet::from([child]);
    let mut current = proposed_manager;
    let mut depth = 1;

    loop {
        if !visited.insert(current) {
            return Err(HierarchyError::CircularReference);
        }
        match parents.get(&current) {
            None => return Ok(depth),
            Some(&next) => {
                depth += 1;
                if depth > max_depth {
                    return Err(HierarchyError::DepthExceeded { max: max_depth });
                }
                current = next;
            }
        }
    }
}

/// Whether `manager` appears above `user` in the parent-pointer map.
pub fn is_in_chain(
    parents: &HashMap<Uuid, Uuid>,
    manager: Uuid,
    user: Uuid,
    max_depth: usize,
) -> bool {
    let mut visited = HashSet::from([user]);
    let mut current = user;
    for _ in 0..max_depth {
        match parents.get(&current) {
            Some(&next) if next == manager => return true,
            Some(&next) if visited.insert(next) => current = next,
            _ => return false,
        }
    }
    false
}

fn parent_map(rows: &[UserRoleHierarchy]) -> HashMap<Uuid, Uuid> {
    rows.iter()
        .filter_map(|row| row.manager_user_id.map(|m| (row.user_id, m)))
        .collect()
}

/// Checks for a proposed assignment, in the order they are reported.
struct Preflight {
    violations: Vec<HierarchyError>,
    existing: Option<UserRoleHierarchy>,
    role_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct HierarchyService {
    db: DBService,
    config: SecurityConfig,
}

impl HierarchyService {
    pub fn new(db: DBService, config: SecurityConfig) -> Self {
        Self { db, config }
    }

    pub fn max_depth(&self) -> usize {
        self.config.max_hierarchy_depth
    }

    async fn preflight(
        &self,
        conn: &mut SqliteConnection,
        req: &AssignManagerRequest,
    ) -> Result<Preflight, HierarchyError> {
        let mut violations = Vec::new();

        if Program::find_by_id(&mut *conn, req.program_id).await?.is_none() {
            return Err(HierarchyError::ProgramNotFound);
        }
        let Some(_user) = User::find_by_id(&mut *conn, req.user_id).await? else {
            return Err(HierarchyError::UserNotFound);
        };
        let Some(manager) = User::find_by_id(&mut *conn, req.manager_user_id).await? else {
            return Err(HierarchyError::ManagerNotFound);
        };

        if req.user_id == req.manager_user_id {
            violations.push(HierarchyError::SelfManagement);
        }

        let rows = UserRoleHierarchy::find_by_program(&mut *conn, req.program_id).await?;
        let manager_row = rows.iter().find(|r| r.user_id == manager.id);
        if manager_row.is_none() && manager.program_id != Some(req.program_id) {
            violations.push(HierarchyError::ManagerNotInProgram);
        }
        if let Some(row) = manager_row {
            let role = HierarchicalRole::find_by_id(&mut *conn, row.hierarchical_role_id).await?;
            if !role.is_some_and(|r| r.is_manager) {
                violations.push(HierarchyError::ManagerRoleNotManager);
            }
        }

        let existing = rows.iter().find(|r| r.user_id == req.user_id).cloned();
        if let Some(current) = existing.as_ref().and_then(|r| r.manager_user_id) {
            if !req.replace_existing {
                violations.push(HierarchyError::AlreadyManaged {
                    manager_user_id: current,
                });
            }
        }

        if req.user_id != req.manager_user_id {
            if let Err(e) = check_manager_chain(
                &parent_map(&rows),
                req.user_id,
                req.manager_user_id,
                self.config.max_hierarchy_depth,
            ) {
                violations.push(e);
            }
        }

        let role_id = req
            .hierarchical_role_id
            .or(existing.as_ref().map(|r| r.hierarchical_role_id));
        match role_id {
            None => violations.push(HierarchyError::RoleRequired),
            Some(id) => {
                if HierarchicalRole::find_by_id(&mut *conn, id).await?.is_none() {
                    violations.push(HierarchyError::RoleNotFound);
                }
            }
        }

        Ok(Preflight {
            violations,
            existing,
            role_id,
        })
    }

    /// Assign (or, with `replace_existing`, reassign) a user's manager within a program.
    pub async fn assign_manager(
        &self,
        req: &AssignManagerRequest,
        changed_by: Uuid,
    ) -> Result<ManagerAssignment, HierarchyError> {
        let mut tx = self.db.pool.begin().await?;

        let preflight = self.preflight(&mut tx, req).await?;
        if let Some(violation) = preflight.violations.into_iter().next() {
            warn!(
                user_id = %req.user_id,
                manager_user_id = %req.manager_user_id,
                program_id = %req.program_id,
                reason = %violation,
                "Rejected manager assignment"
            );
            return Err(violation);
        }
        let role_id = preflight.role_id.ok_or(HierarchyError::RoleRequired)?;
        let previous_manager_id = preflight.existing.and_then(|r| r.manager_user_id);
        let change_type = if previous_manager_id.is_some() {
            ChangeType::Reassigned
        } else {
            ChangeType::Assigned
        };

        let result: Result<UserRoleHierarchy, sqlx::Error> = async {
            let hierarchy = UserRoleHierarchy::upsert(
                &mut *tx,
                req.user_id,
                req.program_id,
                role_id,
                Some(req.manager_user_id),
            )
            .await?;
            User::update_hierarchy(&mut *tx, req.user_id, Some(req.manager_user_id), Some(role_id))
                .await?;
            HierarchyChangeLog::create(
                &mut *tx,
                &NewHierarchyChange {
                    user_id: req.user_id,
                    program_id: req.program_id,
                    old_manager_id: previous_manager_id,
                    new_manager_id: Some(req.manager_user_id),
                    changed_by_user_id: Some(changed_by),
                    change_type,
                    reason: req.reason.clone(),
                },
            )
            .await?;
            Ok(hierarchy)
        }
        .await;

        let hierarchy = match result {
            Ok(hierarchy) => hierarchy,
            Err(e) => {
                error!(user_id = %req.user_id, error = %e, "Manager assignment failed, rolling back");
                tx.rollback().await?;
                return Err(e.into());
            }
        };
        tx.commit().await?;

        info!(
            user_id = %req.user_id,
            manager_user_id = %req.manager_user_id,
            program_id = %req.program_id,
            change_type = %change_type,
            "Manager assigned"
        );

        Ok(ManagerAssignment {
            hierarchy,
            change_type,
            previous_manager_id,
        })
    }

    pub async fn remove_manager(
        &self,
        req: &RemoveManagerRequest,
        changed_by: Uuid,
    ) -> Result<UserRoleHierarchy, HierarchyError> {
        let mut tx = self.db.pool.begin().await?;

        let row = UserRoleHierarchy::find_by_user_and_program(&mut *tx, req.user_id, req.program_id)
            .await?
            .ok_or(HierarchyError::NoManagerAssigned)?;
        let old_manager = row.manager_user_id.ok_or(HierarchyError::NoManagerAssigned)?;

        UserRoleHierarchy::clear_manager(&mut *tx, req.user_id, req.program_id).await?;
        User::update_hierarchy(&mut *tx, req.user_id, None, Some(row.hierarchical_role_id)).await?;
        HierarchyChangeLog::create(
            &mut *tx,
            &NewHierarchyChange {
                user_id: req.user_id,
                program_id: req.program_id,
                old_manager_id: Some(old_manager),
                new_manager_id: None,
                changed_by_user_id: Some(changed_by),
                change_type: ChangeType::Removed,
                reason: req.reason.clone(),
            },
        )
        .await?;
        let updated =
            UserRoleHierarchy::find_by_user_and_program(&mut *tx, req.user_id, req.program_id)
                .await?
                .ok_or(HierarchyError::NoManagerAssigned)?;
        tx.commit().await?;

        info!(user_id = %req.user_id, program_id = %req.program_id, "Manager removed");
        Ok(updated)
    }

    /// Dry run of [`Self::assign_manager`] reporting every failed check.
    pub async fn validate_assignment(
        &self,
        req: &AssignManagerRequest,
    ) -> Result<AssignmentValidation, HierarchyError> {
        let mut conn = self.db.pool.acquire().await?;
        let violations = match self.preflight(&mut conn, req).await {
            Ok(preflight) => preflight.violations,
            Err(HierarchyError::Database(e)) => return Err(e.into()),
            Err(other) => vec![other],
        };

        Ok(AssignmentValidation {
            valid: violations.is_empty(),
            would_create_circular_reference: violations
                .iter()
                .any(|v| matches!(v, HierarchyError::CircularReference)),
            errors: violations.iter().map(ToString::to_string).collect(),
        })
    }

    /// Everyone below `manager_id` in the program, breadth first, bounded by the max depth.
    pub async fn all_subordinates(
        &self,
        manager_id: Uuid,
        program_id: Uuid,
    ) -> Result<Vec<Subordinate>, HierarchyError> {
        let members = HierarchyMember::find_by_program(&self.db.pool, program_id).await?;
        Ok(collect_subordinates(
            &members,
            manager_id,
            self.config.max_hierarchy_depth,
        ))
    }

    pub async fn hierarchy_tree(&self, program_id: Uuid) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let members = HierarchyMember::find_by_program(&self.db.pool, program_id).await?;
        Ok(build_tree(&members, self.config.max_hierarchy_depth))
    }

    pub async fn manager_team(
        &self,
        manager_id: Uuid,
        program_id: Uuid,
    ) -> Result<Vec<HierarchyMember>, HierarchyError> {
        Ok(HierarchyMember::find_direct_reports(&self.db.pool, manager_id, program_id).await?)
    }

    pub async fn team_statistics(
        &self,
        manager_id: Uuid,
        program_id: Uuid,
    ) -> Result<TeamStatistics, HierarchyError> {
        let subordinates = self.all_subordinates(manager_id, program_id).await?;
        Ok(team_statistics(&subordinates))
    }

    /// Whether `manager_id` sits anywhere above `user_id`, in one program or in any program
    /// the user belongs to.
    pub async fn is_user_in_manager_chain(
        &self,
        manager_id: Uuid,
        user_id: Uuid,
        program_id: Option<Uuid>,
    ) -> Result<bool, HierarchyError> {
        let programs = match program_id {
            Some(id) => vec![id],
            None => UserRoleHierarchy::find_by_user(&self.db.pool, user_id)
                .await?
                .into_iter()
                .map(|r| r.program_id)
                .collect(),
        };

        for program in programs {
            let rows = UserRoleHierarchy::find_by_program(&self.db.pool, program).await?;
            if is_in_chain(
                &parent_map(&rows),
                manager_id,
                user_id,
                self.config.max_hierarchy_depth,
            ) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn can_access_program(&self, user: &User, program_id: Uuid) -> Result<bool, HierarchyError> {
        if user.role.is_platform_admin() {
            return Ok(true);
        }
        if user.program_id == Some(program_id) {
            return Ok(true);
        }
        if user.role.is_program_scoped() {
            return Ok(false);
        }
        Ok(
            UserRoleHierarchy::find_by_user_and_program(&self.db.pool, user.id, program_id)
                .await?
                .is_some(),
        )
    }

    /// Whether `user_id` belongs to `program_id`, by assignment or by a position in its hierarchy.
    pub async fn is_program_member(
        &self,
        user_id: Uuid,
        program_id: Uuid,
    ) -> Result<bool, HierarchyError> {
        let user = User::find_by_id(&self.db.pool, user_id)
            .await?
            .ok_or(HierarchyError::UserNotFound)?;
        if user.program_id == Some(program_id) {
            return Ok(true);
        }
        Ok(
            UserRoleHierarchy::find_by_user_and_program(&self.db.pool, user_id, program_id)
                .await?
                .is_some(),
        )
    }

    pub async fn has_hierarchy_permission(
        &self,
        user: &User,
        action: HierarchyAction,
    ) -> Result<bool, HierarchyError> {
        if self.config.is_bypass_role(user.role) {
            return Ok(true);
        }
        if !UserRoleHierarchy::has_reports(&self.db.pool, user.id, None).await? {
            return Ok(false);
        }
        let p = &self.config.manager_permissions;
        Ok(match action {
            HierarchyAction::ViewAnalytics => p.view_analytics,
            HierarchyAction::ViewTeamProfiles => p.view_team_profiles,
            HierarchyAction::SendNotifications => p.send_notifications,
            HierarchyAction::ExportData => p.export_data,
            HierarchyAction::AssignActivities => p.assign_activities,
            HierarchyAction::ModifyStructure => p.modify_structure,
        })
    }

    /// Number of managers above the user in the program.
    pub async fn hierarchy_depth(&self, user_id: Uuid, program_id: Uuid) -> Result<usize, HierarchyError> {
        let rows = UserRoleHierarchy::find_by_program(&self.db.pool, program_id).await?;
        let parents = parent_map(&rows);
        let mut visited = HashSet::from([user_id]);
        let mut current = user_id;
        let mut depth = 0;
        while let Some(&next) = parents.get(&current) {
            if !visited.insert(next) || depth >= self.config.max_hierarchy_depth {
                break;
            }
            depth += 1;
            current = next;
        }
        Ok(depth)
    }

    pub async fn user_info(
        &self,
        user_id: Uuid,
        program_id: Option<Uuid>,
    ) -> Result<UserHierarchyInfo, HierarchyError> {
        let user = User::find_by_id(&self.db.pool, user_id)
            .await?
            .ok_or(HierarchyError::UserNotFound)?;
        let Some(program_id) = program_id.or(user.program_id) else {
            return Ok(UserHierarchyInfo {
                user,
                hierarchy: None,
                manager: None,
                direct_reports: Vec::new(),
                depth: 0,
            });
        };

        let hierarchy =
            UserRoleHierarchy::find_by_user_and_program(&self.db.pool, user_id, program_id).await?;
        let manager = match hierarchy.as_ref().and_then(|h| h.manager_user_id) {
            Some(id) => User::find_by_id(&self.db.pool, id).await?,
            None => None,
        };
        let direct_reports =
            HierarchyMember::find_direct_reports(&self.db.pool, user_id, program_id).await?;
        let depth = self.hierarchy_depth(user_id, program_id).await?;

        Ok(UserHierarchyInfo {
            user,
            hierarchy,
            manager,
            direct_reports,
            depth,
        })
    }

    pub async fn change_logs(
        &self,
        filter: &ChangeLogFilter,
    ) -> Result<Vec<HierarchyChangeLog>, HierarchyError> {
        Ok(HierarchyChangeLog::find(&self.db.pool, filter).await?)
    }

    /// Roles exempt from hierarchy data-scope checks.
    pub fn bypasses_scope(&self, role: UserRole) -> bool {
        self.config.is_bypass_role(role)
    }
}

pub fn collect_subordinates(
    members: &[HierarchyMember],
    manager_id: Uuid,
    max_depth: usize,
) -> Vec<Subordinate> {
    let mut children: HashMap<Uuid, Vec<&HierarchyMember>> = HashMap::new();
    for member in members {
        if let Some(manager) = member.manager_user_id {
            children.entry(manager).or_default().push(member);
        }
    }

    let mut result = Vec::new();
    let mut visited = HashSet::from([manager_id]);
    let mut queue = VecDeque::from([(manager_id, 0usize)]);
    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for child in children.get(&current).into_iter().flatten() {
            if !visited.insert(child.user_id) {
                continue;
            }
            result.push(Subordinate {
                user_id: child.user_id,
                name: child.name.clone(),
                email: child.email.clone(),
                status: child.status,
                is_manager: child.is_manager,
                depth: depth + 1,
            });
            queue.push_back((child.user_id, depth + 1));
        }
    }
    result
}

pub fn team_statistics(subordinates: &[Subordinate]) -> TeamStatistics {
    let mut stats = TeamStatistics {
        total_subordinates: subordinates.len(),
        ..Default::default()
    };
    for s in subordinates {
        if s.depth == 1 {
            stats.direct_reports += 1;
        }
        match s.status {
            ActiveStatus::Active => stats.active_members += 1,
            ActiveStatus::Inactive => stats.inactive_members += 1,
        }
        if s.is_manager {
            stats.managers += 1;
        } else {
            stats.staff += 1;
        }
        stats.max_depth = stats.max_depth.max(s.depth);
    }
    stats
}

/// Nest members under their managers. Members whose manager is outside the program are roots.
pub fn build_tree(members: &[HierarchyMember], max_depth: usize) -> Vec<HierarchyNode> {
    let in_program: HashSet<Uuid> = members.iter().map(|m| m.user_id).collect();
    let mut children: HashMap<Uuid, Vec<&HierarchyMember>> = HashMap::new();
    let mut roots = Vec::new();
    for member in members {
        match member.manager_user_id {
            Some(manager) if in_program.contains(&manager) => {
                children.entry(manager).or_default().push(member)
            }
            _ => roots.push(member),
        }
    }

    fn node(
        member: &HierarchyMember,
        children: &HashMap<Uuid, Vec<&HierarchyMember>>,
        visited: &mut HashSet<Uuid>,
        remaining: usize,
    ) -> HierarchyNode {
        let mut kids = Vec::new();
        if remaining > 0 {
            for child in children.get(&member.user_id).into_iter().flatten() {
                if visited.insert(child.user_id) {
                    kids.push(node(child, children, visited, remaining - 1));
                }
            }
        }
        HierarchyNode {
            user_id: member.user_id,
            name: member.name.clone(),
            email: member.email.clone(),
            role_name: member.role_name.clone(),
            role_code: member.role_code.clone(),
            is_manager: member.is_manager,
            children: kids,
        }
    }

    let mut visited: HashSet<Uuid> = roots.iter().map(|m| m.user_id).collect();
    roots
        .into_iter()
        .map(|root| node(root, &children, &mut visited, max_depth))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn chain_check_accepts_fresh_edge() {
        let u = ids(3);
        // u1 -> u0
        let parents = HashMap::from([(u[1], u[0])]);
        assert_eq!(check_manager_chain(&parents, u[2], u[1], 10).unwrap(), 2);
        assert_eq!(check_manager_chain(&parents, u[2], u[0], 10).unwrap(), 1);
    }

    #[test]
    fn chain_check_detects_cycle() {
        let u = ids(3);
        // u2 -> u1 -> u0; making u2 the manager of u0 closes a loop
        let parents = HashMap::from([(u[2], u[1]), (u[1], u[0])]);
        assert!(matches!(
            check_manager_chain(&parents, u[0], u[2], 10),
            Err(HierarchyError::CircularReference)
        ));
    }

    #[test]
    fn chain_check_stops_on_existing_corruption() {
        let u = ids(3);
        // u0 <-> u1 already loops; the walk must terminate
        let parents = HashMap::from([(u[0], u[1]), (u[1], u[0])]);
        assert!(matches!(
            check_manager_chain(&parents, u[2], u[0], 10),
            Err(HierarchyError::CircularReference)
        ));
    }

    #[test]
    fn chain_check_enforces_depth() {
        let u = ids(12);
        let parents: HashMap<Uuid, Uuid> = (1..11).map(|i| (u[i], u[i - 1])).collect();
        // u10 has 10 managers above, so placing u11 under it gives depth 11
        assert!(matches!(
            check_manager_chain(&parents, u[11], u[10], 10),
            Err(HierarchyError::DepthExceeded { max: 10 })
        ));
        assert_eq!(check_manager_chain(&parents, u[11], u[9], 10).unwrap(), 10);
    }

    #[test]
    fn chain_membership() {
        let u = ids(4);
        let parents = HashMap::from([(u[2], u[1]), (u[1], u[0])]);
        assert!(is_in_chain(&parents, u[0], u[2], 10));
        assert!(is_in_chain(&parents, u[1], u[2], 10));
        assert!(!is_in_chain(&parents, u[2], u[0], 10));
        assert!(!is_in_chain(&parents, u[3], u[2], 10));
        assert!(!is_in_chain(&parents, u[0], u[2], 1));
    }

    #[tokio::test]
    async fn assignment_rejects_self_management() {
        let fx = test_support::hierarchy_fixture().await;
        let err = fx
            .service
            .assign_manager(&fx.request(fx.staff_a, fx.staff_a), fx.admin)
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::SelfManagement));
    }

    #[tokio::test]
    async fn assignment_rejects_cycles() {
        let fx = test_support::hierarchy_fixture().await;
        // lead -> staff_a already; staff_a managing lead would loop
        fx.service
            .assign_manager(&fx.request(fx.staff_a, fx.lead), fx.admin)
            .await
            .unwrap();
        fx.promote(fx.staff_a).await;

        let err = fx
            .service
            .assign_manager(&fx.request(fx.lead, fx.staff_a), fx.admin)
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::CircularReference));

        let report = fx
            .service
            .validate_assignment(&fx.request(fx.lead, fx.staff_a))
            .await
            .unwrap();
        assert!(!report.valid);
        assert!(report.would_create_circular_reference);
    }

    #[tokio::test]
    async fn second_manager_conflicts_unless_replacing() {
        let fx = test_support::hierarchy_fixture().await;
        fx.service
            .assign_manager(&fx.request(fx.staff_a, fx.lead), fx.admin)
            .await
            .unwrap();
        fx.promote(fx.staff_b).await;

        let err = fx
            .service
            .assign_manager(&fx.request(fx.staff_a, fx.staff_b), fx.admin)
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::AlreadyManaged { .. }));

        let mut replace = fx.request(fx.staff_a, fx.staff_b);
        replace.replace_existing = true;
        let outcome = fx.service.assign_manager(&replace, fx.admin).await.unwrap();
        assert_eq!(outcome.change_type, ChangeType::Reassigned);
        assert_eq!(outcome.previous_manager_id, Some(fx.lead));

        let logs = fx
            .service
            .change_logs(&ChangeLogFilter {
                user_id: Some(fx.staff_a),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().any(|l| l.change_type == ChangeType::Reassigned));
        assert!(logs.iter().any(|l| l.change_type == ChangeType::Assigned));
    }

    #[tokio::test]
    async fn manager_with_staff_role_is_rejected() {
        let fx = test_support::hierarchy_fixture().await;
        fx.service
            .assign_manager(&fx.request(fx.staff_a, fx.lead), fx.admin)
            .await
            .unwrap();
        let err = fx
            .service
            .assign_manager(&fx.request(fx.staff_b, fx.staff_a), fx.admin)
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::ManagerRoleNotManager));
    }

    #[tokio::test]
    async fn program_membership_counts_assignment_and_positions() {
        let fx = test_support::hierarchy_fixture().await;
        assert!(fx.service.is_program_member(fx.staff_a, fx.program).await.unwrap());
        assert!(!fx.service.is_program_member(fx.staff_a, Uuid::new_v4()).await.unwrap());

        let outsider = test_support::user(&fx.db, "Outsider", UserRole::Participant, None).await;
        assert!(!fx.service.is_program_member(outsider.id, fx.program).await.unwrap());
        UserRoleHierarchy::upsert(&fx.db.pool, outsider.id, fx.program, fx.staff_role, Some(fx.lead))
            .await
            .unwrap();
        assert!(fx.service.is_program_member(outsider.id, fx.program).await.unwrap());

        assert!(matches!(
            fx.service.is_program_member(Uuid::new_v4(), fx.program).await,
            Err(HierarchyError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn subordinates_tree_and_removal() {
        let fx = test_support::hierarchy_fixture().await;
        fx.service
            .assign_manager(&fx.request(fx.staff_a, fx.lead), fx.admin)
            .await
            .unwrap();
        fx.promote(fx.staff_a).await;
        fx.service
            .assign_manager(&fx.request(fx.staff_b, fx.staff_a), fx.admin)
            .await
            .unwrap();

        let subs = fx.service.all_subordinates(fx.lead, fx.program).await.unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs.iter().find(|s| s.user_id == fx.staff_b).unwrap().depth, 2);

        let stats = fx.service.team_statistics(fx.lead, fx.program).await.unwrap();
        assert_eq!(stats.direct_reports, 1);
        assert_eq!(stats.total_subordinates, 2);
        assert_eq!(stats.max_depth, 2);

        assert!(
            fx.service
                .is_user_in_manager_chain(fx.lead, fx.staff_b, Some(fx.program))
                .await
                .unwrap()
        );
        assert_eq!(fx.service.hierarchy_depth(fx.staff_b, fx.program).await.unwrap(), 2);

        let tree = fx.service.hierarchy_tree(fx.program).await.unwrap();
        let root = tree.iter().find(|n| n.user_id == fx.lead).unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].children[0].user_id, fx.staff_b);

        fx.service
            .remove_manager(
                &RemoveManagerRequest {
                    user_id: fx.staff_b,
                    program_id: fx.program,
                    reason: None,
                },
                fx.admin,
            )
            .await
            .unwrap();
        assert!(
            !fx.service
                .is_user_in_manager_chain(fx.lead, fx.staff_b, None)
                .await
                .unwrap()
        );
        let err = fx
            .service
            .remove_manager(
                &RemoveManagerRequest {
                    user_id: fx.staff_b,
                    program_id: fx.program,
                    reason: None,
                },
                fx.admin,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::NoManagerAssigned));
    }
}
