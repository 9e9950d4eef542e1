pub mod api_token;
pub mod evaluation_assignment;
pub mod evaluation_event;
pub mod hierarchical_role;
pub mod hierarchy_change_log;
pub mod manager_action_log;
pub mod manager_dashboard_access;
pub mod notification_log;
pub mod organization;
pub mod program;
pub mod questionnaire;
pub mod system_setting;
pub mod user;
pub mod user_notification;
pub mod user_role_hierarchy;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{
        hierarchical_role::{CreateHierarchicalRole, HierarchicalRole},
        organization::Organization,
        program::{CreateProgram, Program},
        user::{CreateUser, User, UserRole},
    };
    use crate::DBService;

    pub async fn db() -> DBService {
        DBService::new_in_memory().await.unwrap()
    }

    pub async fn program(db: &DBService) -> Program {
        let org = Organization::create(&db.pool, "Acme").await.unwrap();
        Program::create(
            &db.pool,
            &CreateProgram {
                organization_id: org.id,
                name: format!("Program {}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
                description: None,
            },
        )
        .await
        .unwrap()
    }

    pub async fn user(db: &DBService, name: &str, role: UserRole, program_id: Option<Uuid>) -> User {
        User::create(
            &db.pool,
            &CreateUser {
                name: name.to_string(),
                email: format!("{}-{}@example.com", name.to_lowercase(), Uuid::new_v4()),
                password: String::new(),
                role,
                organization_id: None,
                program_id,
            },
            "hash",
        )
        .await
        .unwrap()
    }

    pub async fn role(db: &DBService, code: &str, is_manager: bool) -> HierarchicalRole {
        HierarchicalRole::create(
            &db.pool,
            &CreateHierarchicalRole {
                name: code.to_string(),
                code: code.to_string(),
                hierarchy_level: if is_manager { 2 } else { 1 },
                is_manager,
                can_view_reports: is_manager,
                description: None,
            },
        )
        .await
        .unwrap()
    }
}
