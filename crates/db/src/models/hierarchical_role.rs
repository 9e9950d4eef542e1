use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

use super::organization::ActiveStatus;

/// Position in a program's reporting structure (e.g. team lead, staff).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct HierarchicalRole {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub hierarchy_level: i64,
    pub is_manager: bool,
    pub can_view_reports: bool,
    pub description: Option<String>,
    pub status: ActiveStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateHierarchicalRole {
    pub name: String,
    pub code: String,
    pub hierarchy_level: i64,
    pub is_manager: bool,
    #[serde(default)]
    pub can_view_reports: bool,
    pub description: Option<String>,
}

const ROLE_COLUMNS: &str = "id, name, code, hierarchy_level, is_manager, can_view_reports, \
     description, status, created_at, updated_at";

impl HierarchicalRole {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateHierarchicalRole,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, HierarchicalRole>(&format!(
            r#"INSERT INTO hierarchical_roles
                   (id, name, code, hierarchy_level, is_manager, can_view_reports, description,
                    status, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', $8, $8)
               RETURNING {ROLE_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(&data.name)
        .bind(&data.code)
        .bind(data.hierarchy_level)
        .bind(data.is_manager)
        .bind(data.can_view_reports)
        .bind(&data.description)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, HierarchicalRole>(&format!(
            "SELECT {ROLE_COLUMNS} FROM hierarchical_roles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_code(pool: &SqlitePool, code: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, HierarchicalRole>(&format!(
            "SELECT {ROLE_COLUMNS} FROM hierarchical_roles WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_active(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, HierarchicalRole>(&format!(
            r#"SELECT {ROLE_COLUMNS} FROM hierarchical_roles
               WHERE status = 'active'
               ORDER BY hierarchy_level DESC, name"#
        ))
        .fetch_all(pool)
        .await
    }
}
