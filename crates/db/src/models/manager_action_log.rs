use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, types::Json};
use ts_rs::TS;
use uuid::Uuid;

/// Audit record of a hierarchy/manager endpoint call.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ManagerActionLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub method: String,
    pub path: String,
    pub status_code: i64,
    pub target_user_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
    pub execution_time_ms: i64,
    #[ts(type = "unknown")]
    pub request_payload: Option<Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewManagerAction {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub target_user_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
    pub execution_time_ms: i64,
    pub request_payload: Option<serde_json::Value>,
}

impl ManagerActionLog {
    pub async fn create(pool: &SqlitePool, data: NewManagerAction) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, ManagerActionLog>(
            r#"INSERT INTO manager_action_logs
                   (id, user_id, action, method, path, status_code, target_user_id, program_id,
                    execution_time_ms, request_payload, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               RETURNING id, user_id, action, method, path, status_code, target_user_id,
                         program_id, execution_time_ms, request_payload, created_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(data.user_id)
        .bind(data.action)
        .bind(data.method)
        .bind(data.path)
        .bind(i64::from(data.status_code))
        .bind(data.target_user_id)
        .bind(data.program_id)
        .bind(data.execution_time_ms)
        .bind(data.request_payload.map(Json))
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_user(
        pool: &SqlitePool,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ManagerActionLog>(
            r#"SELECT id, user_id, action, method, path, status_code, target_user_id,
                      program_id, execution_time_ms, request_payload, created_at
               FROM manager_action_logs
               WHERE user_id = $1
               ORDER BY created_at DESC
               LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
