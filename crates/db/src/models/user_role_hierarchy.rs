use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

use super::organization::ActiveStatus;

/// A user's position inside one program. `manager_user_id` is the parent pointer of the
/// program's reporting tree.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct UserRoleHierarchy {
    pub id: Uuid,
    pub user_id: Uuid,
    pub program_id: Uuid,
    pub hierarchical_role_id: Uuid,
    pub manager_user_id: Option<Uuid>,
    pub assigned_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Hierarchy row joined with its user and role, used for trees and team views.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct HierarchyMember {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub status: ActiveStatus,
    pub manager_user_id: Option<Uuid>,
    pub hierarchical_role_id: Uuid,
    pub role_name: String,
    pub role_code: String,
    pub hierarchy_level: i64,
    pub is_manager: bool,
}

const HIERARCHY_COLUMNS: &str = "id, user_id, program_id, hierarchical_role_id, manager_user_id, \
     assigned_at, created_at, updated_at";

const MEMBER_SELECT: &str = r#"SELECT
        h.user_id AS user_id,
        u.name AS name,
        u.email AS email,
        u.status AS status,
        h.manager_user_id AS manager_user_id,
        h.hierarchical_role_id AS hierarchical_role_id,
        r.name AS role_name,
        r.code AS role_code,
        r.hierarchy_level AS hierarchy_level,
        r.is_manager AS is_manager
    FROM user_role_hierarchy h
    JOIN users u ON u.id = h.user_id
    JOIN hierarchical_roles r ON r.id = h.hierarchical_role_id"#;

impl UserRoleHierarchy {
    pub async fn find_by_user_and_program<'e, E>(
        executor: E,
        user_id: Uuid,
        program_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, UserRoleHierarchy>(&format!(
            r#"SELECT {HIERARCHY_COLUMNS} FROM user_role_hierarchy
               WHERE user_id = $1 AND program_id = $2"#
        ))
        .bind(user_id)
        .bind(program_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_program<'e, E>(
        executor: E,
        program_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, UserRoleHierarchy>(&format!(
            r#"SELECT {HIERARCHY_COLUMNS} FROM user_role_hierarchy
               WHERE program_id = $1
               ORDER BY assigned_at"#
        ))
        .bind(program_id)
        .fetch_all(executor)
        .await
    }

    pub async fn find_by_user(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, UserRoleHierarchy>(&format!(
            "SELECT {HIERARCHY_COLUMNS} FROM user_role_hierarchy WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Whether `manager_user_id` manages anyone, optionally within one program.
    pub async fn has_reports(
        pool: &SqlitePool,
        manager_user_id: Uuid,
        program_id: Option<Uuid>,
    ) -> Result<bool, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM user_role_hierarchy
               WHERE manager_user_id = $1 AND ($2 IS NULL OR program_id = $2)"#,
        )
        .bind(manager_user_id)
        .bind(program_id)
        .fetch_one(pool)
        .await?;
        Ok(count > 0)
    }

    /// Insert the user's row for the program or replace its manager and role.
    pub async fn upsert<'e, E>(
        executor: E,
        user_id: Uuid,
        program_id: Uuid,
        hierarchical_role_id: Uuid,
        manager_user_id: Option<Uuid>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, UserRoleHierarchy>(&format!(
            r#"INSERT INTO user_role_hierarchy
                   (id, user_id, program_id, hierarchical_role_id, manager_user_id,
                    assigned_at, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $6, $6)
               ON CONFLICT(user_id, program_id) DO UPDATE SET
                   hierarchical_role_id = excluded.hierarchical_role_id,
                   manager_user_id = excluded.manager_user_id,
                   assigned_at = excluded.assigned_at,
                   updated_at = excluded.updated_at
               RETURNING {HIERARCHY_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(program_id)
        .bind(hierarchical_role_id)
        .bind(manager_user_id)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn clear_manager<'e, E>(
        executor: E,
        user_id: Uuid,
        program_id: Uuid,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE user_role_hierarchy
               SET manager_user_id = NULL, updated_at = $3
               WHERE user_id = $1 AND program_id = $2"#,
        )
        .bind(user_id)
        .bind(program_id)
        .bind(Utc::now())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}

impl HierarchyMember {
    pub async fn find_by_program(
        pool: &SqlitePool,
        program_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, HierarchyMember>(&format!(
            "{MEMBER_SELECT} WHERE h.program_id = $1 ORDER BY r.hierarchy_level DESC, u.name"
        ))
        .bind(program_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_direct_reports(
        pool: &SqlitePool,
        manager_user_id: Uuid,
        program_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, HierarchyMember>(&format!(
            "{MEMBER_SELECT} WHERE h.program_id = $1 AND h.manager_user_id = $2 ORDER BY u.name"
        ))
        .bind(program_id)
        .bind(manager_user_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{test_support, user::UserRole};

    #[tokio::test]
    async fn upsert_keeps_one_row_per_user_and_program() {
        let db = test_support::db().await;
        let program = test_support::program(&db).await;
        let staff = test_support::role(&db, "staff", false).await;
        let lead = test_support::user(&db, "Lead", UserRole::Participant, Some(program.id)).await;
        let other = test_support::user(&db, "Other", UserRole::Participant, Some(program.id)).await;
        let member = test_support::user(&db, "Member", UserRole::Participant, Some(program.id)).await;

        let first =
            UserRoleHierarchy::upsert(&db.pool, member.id, program.id, staff.id, Some(lead.id))
                .await
                .unwrap();
        let second =
            UserRoleHierarchy::upsert(&db.pool, member.id, program.id, staff.id, Some(other.id))
                .await
                .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.manager_user_id, Some(other.id));
        assert_eq!(
            UserRoleHierarchy::find_by_program(&db.pool, program.id).await.unwrap().len(),
            1
        );
        assert!(UserRoleHierarchy::has_reports(&db.pool, other.id, None).await.unwrap());
        assert!(!UserRoleHierarchy::has_reports(&db.pool, lead.id, None).await.unwrap());
    }

    #[tokio::test]
    async fn members_join_user_and_role() {
        let db = test_support::db().await;
        let program = test_support::program(&db).await;
        let lead_role = test_support::role(&db, "lead", true).await;
        let lead = test_support::user(&db, "Lead", UserRole::Participant, Some(program.id)).await;

        UserRoleHierarchy::upsert(&db.pool, lead.id, program.id, lead_role.id, None)
            .await
            .unwrap();

        let members = HierarchyMember::find_by_program(&db.pool, program.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "Lead");
        assert!(members[0].is_manager);
        assert_eq!(members[0].role_code, "lead");
    }
}
