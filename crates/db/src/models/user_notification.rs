use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// In-app inbox entry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct UserNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub from_user_id: Option<Uuid>,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, from_user_id, notification_type, title, message, read_at, created_at";

impl UserNotification {
    pub async fn create(
        pool: &SqlitePool,
        user_id: Uuid,
        from_user_id: Option<Uuid>,
        notification_type: &str,
        title: &str,
        message: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, UserNotification>(&format!(
            r#"INSERT INTO user_notifications
                   (id, user_id, from_user_id, notification_type, title, message, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING {NOTIFICATION_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(from_user_id)
        .bind(notification_type)
        .bind(title)
        .bind(message)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn find_for_user(
        pool: &SqlitePool,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, UserNotification>(&format!(
            r#"SELECT {NOTIFICATION_COLUMNS} FROM user_notifications
               WHERE user_id = $1 AND ($2 = 0 OR read_at IS NULL)
               ORDER BY created_at DESC
               LIMIT 200"#
        ))
        .bind(user_id)
        .bind(unread_only)
        .fetch_all(pool)
        .await
    }

    /// Mark one of the user's notifications read. Returns `None` if it is not theirs.
    pub async fn mark_read(
        pool: &SqlitePool,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, UserNotification>(&format!(
            r#"UPDATE user_notifications SET read_at = COALESCE(read_at, $3)
               WHERE id = $1 AND user_id = $2
               RETURNING {NOTIFICATION_COLUMNS}"#
        ))
        .bind(id)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }

    pub async fn unread_count(pool: &SqlitePool, user_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_notifications WHERE user_id = $1 AND read_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
    }
}
