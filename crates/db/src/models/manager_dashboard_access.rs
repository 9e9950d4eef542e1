use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// Per-program switches for what a manager's dashboard exposes.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ManagerDashboardAccess {
    pub id: Uuid,
    pub manager_user_id: Uuid,
    pub program_id: Uuid,
    pub can_view_team_analytics: bool,
    pub can_view_team_responses: bool,
    pub can_send_notifications: bool,
    pub can_export_data: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct UpdateDashboardAccess {
    pub can_view_team_analytics: Option<bool>,
    pub can_view_team_responses: Option<bool>,
    pub can_send_notifications: Option<bool>,
    pub can_export_data: Option<bool>,
}

const ACCESS_COLUMNS: &str = "id, manager_user_id, program_id, can_view_team_analytics, \
     can_view_team_responses, can_send_notifications, can_export_data, created_at, updated_at";

impl ManagerDashboardAccess {
    pub async fn find(
        pool: &SqlitePool,
        manager_user_id: Uuid,
        program_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ManagerDashboardAccess>(&format!(
            r#"SELECT {ACCESS_COLUMNS} FROM manager_dashboard_access
               WHERE manager_user_id = $1 AND program_id = $2"#
        ))
        .bind(manager_user_id)
        .bind(program_id)
        .fetch_optional(pool)
        .await
    }

    /// Create the row with column defaults on first write, then apply the given switches.
    pub async fn upsert(
        pool: &SqlitePool,
        manager_user_id: Uuid,
        program_id: Uuid,
        data: &UpdateDashboardAccess,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO manager_dashboard_access (id, manager_user_id, program_id, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $4)
               ON CONFLICT(manager_user_id, program_id) DO NOTHING"#,
        )
        .bind(Uuid::new_v4())
        .bind(manager_user_id)
        .bind(program_id)
        .bind(now)
        .execute(pool)
        .await?;

        sqlx::query_as::<_, ManagerDashboardAccess>(&format!(
            r#"UPDATE manager_dashboard_access SET
                   can_view_team_analytics = COALESCE($3, can_view_team_analytics),
                   can_view_team_responses = COALESCE($4, can_view_team_responses),
                   can_send_notifications = COALESCE($5, can_send_notifications),
                   can_export_data = COALESCE($6, can_export_data),
                   updated_at = $7
               WHERE manager_user_id = $1 AND program_id = $2
               RETURNING {ACCESS_COLUMNS}"#
        ))
        .bind(manager_user_id)
        .bind(program_id)
        .bind(data.can_view_team_analytics)
        .bind(data.can_view_team_responses)
        .bind(data.can_send_notifications)
        .bind(data.can_export_data)
        .bind(now)
        .fetch_one(pool)
        .await
    }
}
