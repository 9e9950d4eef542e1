use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "change_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeType {
    Assigned,
    Reassigned,
    Removed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct HierarchyChangeLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub program_id: Uuid,
    pub old_manager_id: Option<Uuid>,
    pub new_manager_id: Option<Uuid>,
    pub changed_by_user_id: Option<Uuid>,
    pub change_type: ChangeType,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewHierarchyChange {
    pub user_id: Uuid,
    pub program_id: Uuid,
    pub old_manager_id: Option<Uuid>,
    pub new_manager_id: Option<Uuid>,
    pub changed_by_user_id: Option<Uuid>,
    pub change_type: ChangeType,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct ChangeLogFilter {
    pub program_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub limit: Option<i64>,
}

const CHANGE_LOG_COLUMNS: &str = "id, user_id, program_id, old_manager_id, new_manager_id, \
     changed_by_user_id, change_type, reason, created_at";

impl HierarchyChangeLog {
    pub const DEFAULT_LIMIT: i64 = 50;

    pub async fn create<'e, E>(executor: E, change: &NewHierarchyChange) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, HierarchyChangeLog>(&format!(
            r#"INSERT INTO hierarchy_change_log
                   (id, user_id, program_id, old_manager_id, new_manager_id, changed_by_user_id,
                    change_type, reason, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING {CHANGE_LOG_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(change.user_id)
        .bind(change.program_id)
        .bind(change.old_manager_id)
        .bind(change.new_manager_id)
        .bind(change.changed_by_user_id)
        .bind(change.change_type)
        .bind(&change.reason)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    /// Newest first.
    pub async fn find(pool: &SqlitePool, filter: &ChangeLogFilter) -> Result<Vec<Self>, sqlx::Error> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {CHANGE_LOG_COLUMNS} FROM hierarchy_change_log WHERE 1 = 1"
        ));
        if let Some(program_id) = filter.program_id {
            builder.push(" AND program_id = ").push_bind(program_id);
        }
        if let Some(user_id) = filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
        }
        let limit = filter.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 500);
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit);

        builder.build_query_as::<HierarchyChangeLog>().fetch_all(pool).await
    }
}
