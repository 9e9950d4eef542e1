use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqlitePool, Type, types::Json};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::organization::ActiveStatus;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS, EnumString, Display,
)]
#[sqlx(type_name = "user_role", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum UserRole {
    SuperAdmin,
    Admin,
    GroupHead,
    ProgramAdmin,
    ProgramManager,
    ProgramModerator,
    EvaluationAdmin,
    SystemUser,
    Participant,
}

impl UserRole {
    /// Roles confined to the single program on their account.
    pub fn is_program_scoped(self) -> bool {
        matches!(
            self,
            Self::ProgramAdmin | Self::ProgramManager | Self::ProgramModerator
        )
    }

    /// Roles exempt from hierarchy data-scope checks.
    pub fn bypasses_hierarchy_scope(self) -> bool {
        matches!(self, Self::SuperAdmin | Self::Admin | Self::ProgramAdmin)
    }

    pub fn is_platform_admin(self) -> bool {
        matches!(self, Self::SuperAdmin | Self::Admin)
    }
}

/// resource -> action -> allowed
pub type PermissionOverrides = BTreeMap<String, BTreeMap<String, bool>>;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    pub password_hash: String,
    pub role: UserRole,
    pub organization_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
    pub manager_user_id: Option<Uuid>,
    pub hierarchical_role_id: Option<Uuid>,
    pub status: ActiveStatus,
    #[ts(type = "Record<string, Record<string, boolean>> | null")]
    pub permission_overrides: Option<Json<PermissionOverrides>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
    pub organization_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
}

const USER_COLUMNS: &str = "id, name, email, password_hash, role, organization_id, program_id, \
     manager_user_id, hierarchical_role_id, status, permission_overrides, created_at, updated_at";

impl User {
    /// Insert a user; `password_hash` is the already hashed password.
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateUser,
        password_hash: &str,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, User>(&format!(
            r#"INSERT INTO users (id, name, email, password_hash, role, organization_id, program_id,
                                  status, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', $8, $8)
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(&data.name)
        .bind(data.email.trim().to_lowercase())
        .bind(password_hash)
        .bind(data.role)
        .bind(data.organization_id)
        .bind(data.program_id)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_ids(pool: &SqlitePool, ids: &[Uuid]) -> Result<Vec<Self>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users WHERE id IN ("));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY name");
        builder.build_query_as::<User>().fetch_all(pool).await
    }

    pub async fn find_all(
        pool: &SqlitePool,
        program_id: Option<Uuid>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"SELECT {USER_COLUMNS} FROM users
               WHERE ($1 IS NULL OR program_id = $1)
               ORDER BY name"#
        ))
        .bind(program_id)
        .fetch_all(pool)
        .await
    }

    /// Mirror the hierarchy row's manager and role onto the user record.
    pub async fn update_hierarchy<'e, E>(
        executor: E,
        id: Uuid,
        manager_user_id: Option<Uuid>,
        hierarchical_role_id: Option<Uuid>,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"UPDATE users
               SET manager_user_id = $2, hierarchical_role_id = $3, updated_at = $4
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(manager_user_id)
        .bind(hierarchical_role_id)
        .bind(Utc::now())
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn set_permission_overrides(
        pool: &SqlitePool,
        id: Uuid,
        overrides: Option<&PermissionOverrides>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"UPDATE users SET permission_overrides = $2, updated_at = $3
               WHERE id = $1
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(id)
        .bind(overrides.map(Json))
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }

    pub async fn update_status(
        pool: &SqlitePool,
        id: Uuid,
        status: ActiveStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(Utc::now())
            .execute(pool)
            .await?;
        Ok(())
    }

    pub fn overrides(&self) -> Option<&PermissionOverrides> {
        self.permission_overrides.as_ref().map(|json| &json.0)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::models::test_support;

    #[test]
    fn role_strings_are_kebab_case() {
        assert_eq!(UserRole::ProgramAdmin.to_string(), "program-admin");
        assert_eq!(UserRole::from_str("super-admin").unwrap(), UserRole::SuperAdmin);
        assert!(UserRole::ProgramModerator.is_program_scoped());
        assert!(!UserRole::Admin.is_program_scoped());
    }

    #[tokio::test]
    async fn overrides_round_trip_through_json_column() {
        let db = test_support::db().await;
        let user = test_support::user(&db, "Ana", UserRole::Participant, None).await;
        assert!(user.overrides().is_none());

        let mut overrides = PermissionOverrides::new();
        overrides
            .entry("reports".to_string())
            .or_default()
            .insert("export".to_string(), true);
        let updated = User::set_permission_overrides(&db.pool, user.id, Some(&overrides))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.overrides(), Some(&overrides));
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let db = test_support::db().await;
        let user = test_support::user(&db, "Bo", UserRole::Admin, None).await;
        let found = User::find_by_email(&db.pool, &user.email.to_uppercase())
            .await
            .unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));
    }
}
