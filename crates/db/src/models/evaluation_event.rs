use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "evaluation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EvaluationStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Completed,
}

impl EvaluationStatus {
    /// draft -> active <-> paused, active|paused -> completed. Completed is terminal.
    pub fn can_transition_to(self, next: EvaluationStatus) -> bool {
        use EvaluationStatus::*;
        matches!(
            (self, next),
            (Draft, Active) | (Active, Paused) | (Paused, Active) | (Active, Completed) | (Paused, Completed)
        )
    }

    pub fn is_editable(self) -> bool {
        self == EvaluationStatus::Draft
    }
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "evaluation_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvaluationType {
    ManagerToSubordinate,
    SubordinateToManager,
    #[sqlx(rename = "360")]
    #[serde(rename = "360")]
    #[strum(serialize = "360")]
    ThreeSixty,
    Peer,
    #[sqlx(rename = "self")]
    #[serde(rename = "self")]
    #[strum(serialize = "self")]
    SelfReview,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct EvaluationEvent {
    pub id: Uuid,
    pub program_id: Uuid,
    pub questionnaire_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub evaluation_type: EvaluationType,
    pub status: EvaluationStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reminder_days_before: i64,
    pub send_reminders: bool,
    pub is_anonymous: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateEvaluationEvent {
    pub program_id: Uuid,
    pub questionnaire_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub evaluation_type: EvaluationType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reminder_days_before: Option<i64>,
    pub send_reminders: Option<bool>,
    pub is_anonymous: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct UpdateEvaluationEvent {
    pub questionnaire_id: Option<Uuid>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub evaluation_type: Option<EvaluationType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub reminder_days_before: Option<i64>,
    pub send_reminders: Option<bool>,
    pub is_anonymous: Option<bool>,
}

const EVENT_COLUMNS: &str = "id, program_id, questionnaire_id, name, description, evaluation_type, \
     status, start_date, end_date, reminder_days_before, send_reminders, is_anonymous, created_by, \
     created_at, updated_at";

impl EvaluationEvent {
    pub const DEFAULT_REMINDER_DAYS: i64 = 3;

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateEvaluationEvent,
        created_by: Option<Uuid>,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, EvaluationEvent>(&format!(
            r#"INSERT INTO evaluation_events
                   (id, program_id, questionnaire_id, name, description, evaluation_type, status,
                    start_date, end_date, reminder_days_before, send_reminders, is_anonymous,
                    created_by, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, 'draft', $7, $8, $9, $10, $11, $12, $13, $13)
               RETURNING {EVENT_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(data.program_id)
        .bind(data.questionnaire_id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.evaluation_type)
        .bind(data.start_date)
        .bind(data.end_date)
        .bind(data.reminder_days_before.unwrap_or(Self::DEFAULT_REMINDER_DAYS))
        .bind(data.send_reminders.unwrap_or(true))
        .bind(data.is_anonymous.unwrap_or(false))
        .bind(created_by)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, EvaluationEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM evaluation_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_all(
        pool: &SqlitePool,
        program_id: Option<Uuid>,
        status: Option<EvaluationStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, EvaluationEvent>(&format!(
            r#"SELECT {EVENT_COLUMNS} FROM evaluation_events
               WHERE ($1 IS NULL OR program_id = $1)
                 AND ($2 IS NULL OR status = $2)
               ORDER BY start_date DESC, created_at DESC"#
        ))
        .bind(program_id)
        .bind(status)
        .fetch_all(pool)
        .await
    }

    /// Active events whose end date has passed `today`.
    pub async fn find_past_deadline(
        pool: &SqlitePool,
        today: NaiveDate,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, EvaluationEvent>(&format!(
            r#"SELECT {EVENT_COLUMNS} FROM evaluation_events
               WHERE status = 'active' AND end_date < $1"#
        ))
        .bind(today)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateEvaluationEvent,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, EvaluationEvent>(&format!(
            r#"UPDATE evaluation_events SET
                   questionnaire_id = COALESCE($2, questionnaire_id),
                   name = COALESCE($3, name),
                   description = COALESCE($4, description),
                   evaluation_type = COALESCE($5, evaluation_type),
                   start_date = COALESCE($6, start_date),
                   end_date = COALESCE($7, end_date),
                   reminder_days_before = COALESCE($8, reminder_days_before),
                   send_reminders = COALESCE($9, send_reminders),
                   is_anonymous = COALESCE($10, is_anonymous),
                   updated_at = $11
               WHERE id = $1
               RETURNING {EVENT_COLUMNS}"#
        ))
        .bind(id)
        .bind(data.questionnaire_id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.evaluation_type)
        .bind(data.start_date)
        .bind(data.end_date)
        .bind(data.reminder_days_before)
        .bind(data.send_reminders)
        .bind(data.is_anonymous)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }

    /// Conditional status write; returns `None` when the row is no longer in `from`.
    pub async fn update_status<'e, E>(
        executor: E,
        id: Uuid,
        from: EvaluationStatus,
        to: EvaluationStatus,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, EvaluationEvent>(&format!(
            r#"UPDATE evaluation_events SET status = $3, updated_at = $4
               WHERE id = $1 AND status = $2
               RETURNING {EVENT_COLUMNS}"#
        ))
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(Utc::now())
        .fetch_optional(executor)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM evaluation_events WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
