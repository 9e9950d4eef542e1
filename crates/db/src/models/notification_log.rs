use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "notification_channel", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    InApp,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "delivery_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct NotificationLog {
    pub id: Uuid,
    pub program_id: Option<Uuid>,
    pub sender_user_id: Option<Uuid>,
    pub recipient_user_id: Option<Uuid>,
    pub recipient_email: String,
    pub channel: NotificationChannel,
    pub notification_type: String,
    pub subject: String,
    pub status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotificationLog {
    pub program_id: Option<Uuid>,
    pub sender_user_id: Option<Uuid>,
    pub recipient_user_id: Option<Uuid>,
    pub recipient_email: String,
    pub channel: NotificationChannel,
    pub notification_type: String,
    pub subject: String,
    pub status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct NotificationLogFilter {
    pub program_id: Option<Uuid>,
    pub sender_user_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
    pub limit: Option<i64>,
}

const LOG_COLUMNS: &str = "id, program_id, sender_user_id, recipient_user_id, recipient_email, \
     channel, notification_type, subject, status, provider_message_id, error_message, created_at";

impl NotificationLog {
    pub async fn create(pool: &SqlitePool, data: &NewNotificationLog) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, NotificationLog>(&format!(
            r#"INSERT INTO notification_logs
                   (id, program_id, sender_user_id, recipient_user_id, recipient_email, channel,
                    notification_type, subject, status, provider_message_id, error_message, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               RETURNING {LOG_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(data.program_id)
        .bind(data.sender_user_id)
        .bind(data.recipient_user_id)
        .bind(&data.recipient_email)
        .bind(data.channel)
        .bind(&data.notification_type)
        .bind(&data.subject)
        .bind(data.status)
        .bind(&data.provider_message_id)
        .bind(&data.error_message)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn find(
        pool: &SqlitePool,
        filter: &NotificationLogFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {LOG_COLUMNS} FROM notification_logs WHERE 1 = 1"));
        if let Some(program_id) = filter.program_id {
            builder.push(" AND program_id = ").push_bind(program_id);
        }
        if let Some(sender) = filter.sender_user_id {
            builder.push(" AND sender_user_id = ").push_bind(sender);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(100).clamp(1, 1000));

        builder.build_query_as::<NotificationLog>().fetch_all(pool).await
    }
}
