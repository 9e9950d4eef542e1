use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type, types::Json};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "assignment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssignmentStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Overdue,
    Skipped,
}

impl AssignmentStatus {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

/// Relationship of the evaluator to the evaluatee.
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS, EnumString, Display,
)]
#[sqlx(type_name = "evaluator_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EvaluatorType {
    Manager,
    Subordinate,
    Peer,
    #[sqlx(rename = "self")]
    #[serde(rename = "self")]
    #[strum(serialize = "self")]
    SelfReview,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct EvaluationAssignment {
    pub id: Uuid,
    pub evaluation_event_id: Uuid,
    pub evaluator_id: Uuid,
    pub evaluatee_id: Uuid,
    pub evaluator_type: EvaluatorType,
    pub status: AssignmentStatus,
    pub access_token: String,
    #[ts(type = "unknown")]
    pub responses: Option<Json<serde_json::Value>>,
    pub due_date: Option<NaiveDate>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub reminder_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One planned evaluator -> evaluatee pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
pub struct AssignmentPair {
    pub evaluator_id: Uuid,
    pub evaluatee_id: Uuid,
    pub evaluator_type: EvaluatorType,
}

/// Assignment joined with event and evaluatee details for an evaluator's inbox.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct MyAssignment {
    pub id: Uuid,
    pub evaluation_event_id: Uuid,
    pub event_name: String,
    pub evaluatee_id: Uuid,
    pub evaluatee_name: String,
    pub evaluator_type: EvaluatorType,
    pub status: AssignmentStatus,
    pub access_token: String,
    pub due_date: Option<NaiveDate>,
    pub end_date: NaiveDate,
}

/// Open assignment of an active event, with what a reminder email needs.
#[derive(Debug, Clone, FromRow)]
pub struct ReminderCandidate {
    pub assignment_id: Uuid,
    pub evaluation_event_id: Uuid,
    pub event_name: String,
    pub end_date: NaiveDate,
    pub evaluator_id: Uuid,
    pub evaluator_name: String,
    pub evaluator_email: String,
    pub evaluatee_name: String,
    pub access_token: String,
    pub reminder_count: i64,
    pub reminder_sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct AssignmentStatusCounts {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub overdue: i64,
    pub skipped: i64,
}

const ASSIGNMENT_COLUMNS: &str = "id, evaluation_event_id, evaluator_id, evaluatee_id, \
     evaluator_type, status, access_token, responses, due_date, started_at, completed_at, \
     reminder_sent_at, reminder_count, created_at, updated_at";

const CANDIDATE_SELECT: &str = r#"SELECT
        a.id AS assignment_id,
        e.id AS evaluation_event_id,
        e.name AS event_name,
        e.end_date AS end_date,
        a.evaluator_id AS evaluator_id,
        ev.name AS evaluator_name,
        ev.email AS evaluator_email,
        ee.name AS evaluatee_name,
        a.access_token AS access_token,
        a.reminder_count AS reminder_count,
        a.reminder_sent_at AS reminder_sent_at
    FROM evaluation_assignments a
    JOIN evaluation_events e ON e.id = a.evaluation_event_id
    JOIN users ev ON ev.id = a.evaluator_id
    JOIN users ee ON ee.id = a.evaluatee_id"#;

impl EvaluationAssignment {
    pub async fn insert<'e, E>(
        executor: E,
        evaluation_event_id: Uuid,
        pair: &AssignmentPair,
        access_token: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, EvaluationAssignment>(&format!(
            r#"INSERT INTO evaluation_assignments
                   (id, evaluation_event_id, evaluator_id, evaluatee_id, evaluator_type, status,
                    access_token, due_date, reminder_count, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, 0, $8, $8)
               RETURNING {ASSIGNMENT_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(evaluation_event_id)
        .bind(pair.evaluator_id)
        .bind(pair.evaluatee_id)
        .bind(pair.evaluator_type)
        .bind(access_token)
        .bind(due_date)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// (evaluator, evaluatee) pairs already assigned for the event.
    pub async fn existing_pairs<'e, E>(
        executor: E,
        evaluation_event_id: Uuid,
    ) -> Result<Vec<(Uuid, Uuid)>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"SELECT evaluator_id, evaluatee_id FROM evaluation_assignments
               WHERE evaluation_event_id = $1"#,
        )
        .bind(evaluation_event_id)
        .fetch_all(executor)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, EvaluationAssignment>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM evaluation_assignments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_access_token(
        pool: &SqlitePool,
        access_token: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, EvaluationAssignment>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM evaluation_assignments WHERE access_token = $1"
        ))
        .bind(access_token)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_event(
        pool: &SqlitePool,
        evaluation_event_id: Uuid,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, EvaluationAssignment>(&format!(
            r#"SELECT {ASSIGNMENT_COLUMNS} FROM evaluation_assignments
               WHERE evaluation_event_id = $1 AND ($2 IS NULL OR status = $2)
               ORDER BY created_at"#
        ))
        .bind(evaluation_event_id)
        .bind(status)
        .fetch_all(pool)
        .await
    }

    pub async fn find_for_evaluator(
        pool: &SqlitePool,
        evaluator_id: Uuid,
    ) -> Result<Vec<MyAssignment>, sqlx::Error> {
        sqlx::query_as::<_, MyAssignment>(
            r#"SELECT
                   a.id AS id,
                   a.evaluation_event_id AS evaluation_event_id,
                   e.name AS event_name,
                   a.evaluatee_id AS evaluatee_id,
                   u.name AS evaluatee_name,
                   a.evaluator_type AS evaluator_type,
                   a.status AS status,
                   a.access_token AS access_token,
                   a.due_date AS due_date,
                   e.end_date AS end_date
               FROM evaluation_assignments a
               JOIN evaluation_events e ON e.id = a.evaluation_event_id
               JOIN users u ON u.id = a.evaluatee_id
               WHERE a.evaluator_id = $1 AND e.status IN ('active', 'paused', 'completed')
               ORDER BY e.end_date, u.name"#,
        )
        .bind(evaluator_id)
        .fetch_all(pool)
        .await
    }

    pub async fn count_by_status(
        pool: &SqlitePool,
        evaluation_event_id: Uuid,
    ) -> Result<AssignmentStatusCounts, sqlx::Error> {
        let rows = sqlx::query_as::<_, (AssignmentStatus, i64)>(
            r#"SELECT status, COUNT(*) FROM evaluation_assignments
               WHERE evaluation_event_id = $1
               GROUP BY status"#,
        )
        .bind(evaluation_event_id)
        .fetch_all(pool)
        .await?;

        let mut counts = AssignmentStatusCounts::default();
        for (status, count) in rows {
            counts.total += count;
            match status {
                AssignmentStatus::Pending => counts.pending = count,
                AssignmentStatus::InProgress => counts.in_progress = count,
                AssignmentStatus::Completed => counts.completed = count,
                AssignmentStatus::Overdue => counts.overdue = count,
                AssignmentStatus::Skipped => counts.skipped = count,
            }
        }
        Ok(counts)
    }

    /// Move a pending assignment to in_progress; no-op for any other status.
    pub async fn mark_started(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, EvaluationAssignment>(&format!(
            r#"UPDATE evaluation_assignments
               SET status = 'in_progress', started_at = COALESCE(started_at, $2), updated_at = $2
               WHERE id = $1 AND status = 'pending'
               RETURNING {ASSIGNMENT_COLUMNS}"#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(pool)
        .await
    }

    /// Store responses and complete an open assignment.
    pub async fn submit(
        pool: &SqlitePool,
        id: Uuid,
        responses: &serde_json::Value,
    ) -> Result<Option<Self>, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, EvaluationAssignment>(&format!(
            r#"UPDATE evaluation_assignments
               SET status = 'completed',
                   responses = $2,
                   started_at = COALESCE(started_at, $3),
                   completed_at = $3,
                   updated_at = $3
               WHERE id = $1 AND status IN ('pending', 'in_progress')
               RETURNING {ASSIGNMENT_COLUMNS}"#
        ))
        .bind(id)
        .bind(Json(responses))
        .bind(now)
        .fetch_optional(pool)
        .await
    }

    pub async fn update_status(
        pool: &SqlitePool,
        id: Uuid,
        status: AssignmentStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, EvaluationAssignment>(&format!(
            r#"UPDATE evaluation_assignments SET status = $2, updated_at = $3
               WHERE id = $1
               RETURNING {ASSIGNMENT_COLUMNS}"#
        ))
        .bind(id)
        .bind(status)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }

    pub async fn record_reminder(
        pool: &SqlitePool,
        id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE evaluation_assignments
               SET reminder_sent_at = $2, reminder_count = reminder_count + 1, updated_at = $2
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(sent_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Only assignments without responses may be removed.
    pub async fn delete_if_unanswered(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"DELETE FROM evaluation_assignments
               WHERE id = $1 AND responses IS NULL AND status IN ('pending', 'overdue', 'skipped')"#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Open assignments of active, reminder-enabled events ending between `today` and
    /// `today + reminder_days_before`.
    pub async fn find_reminder_candidates(
        pool: &SqlitePool,
        today: NaiveDate,
    ) -> Result<Vec<ReminderCandidate>, sqlx::Error> {
        sqlx::query_as::<_, ReminderCandidate>(&format!(
            r#"{CANDIDATE_SELECT}
               WHERE e.status = 'active'
                 AND e.send_reminders = 1
                 AND a.status IN ('pending', 'in_progress')
                 AND e.end_date >= $1
                 AND julianday(e.end_date) - julianday($1) <= e.reminder_days_before
               ORDER BY e.end_date"#
        ))
        .bind(today)
        .fetch_all(pool)
        .await
    }

    /// Pending assignments of one event, for invitation emails.
    pub async fn find_pending_for_event(
        pool: &SqlitePool,
        event_id: Uuid,
    ) -> Result<Vec<ReminderCandidate>, sqlx::Error> {
        sqlx::query_as::<_, ReminderCandidate>(&format!(
            r#"{CANDIDATE_SELECT}
               WHERE e.id = $1 AND a.status = 'pending'
               ORDER BY ev.name"#
        ))
        .bind(event_id)
        .fetch_all(pool)
        .await
    }

    /// Open assignments of active events whose end date is before `today`.
    pub async fn find_missed_deadlines(
        pool: &SqlitePool,
        today: NaiveDate,
    ) -> Result<Vec<ReminderCandidate>, sqlx::Error> {
        sqlx::query_as::<_, ReminderCandidate>(&format!(
            r#"{CANDIDATE_SELECT}
               WHERE e.status = 'active'
                 AND a.status IN ('pending', 'in_progress')
                 AND e.end_date < $1
               ORDER BY e.end_date"#
        ))
        .bind(today)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        evaluation_event::{CreateEvaluationEvent, EvaluationEvent, EvaluationStatus, EvaluationType},
        test_support,
        user::UserRole,
    };

    #[tokio::test]
    async fn unique_pair_per_event_and_status_counts() {
        let db = test_support::db().await;
        let program = test_support::program(&db).await;
        let a = test_support::user(&db, "A", UserRole::Participant, Some(program.id)).await;
        let b = test_support::user(&db, "B", UserRole::Participant, Some(program.id)).await;
        let today = Utc::now().date_naive();
        let event = EvaluationEvent::create(
            &db.pool,
            &CreateEvaluationEvent {
                program_id: program.id,
                questionnaire_id: None,
                name: "Peer".to_string(),
                description: None,
                evaluation_type: EvaluationType::Peer,
                start_date: today,
                end_date: today,
                reminder_days_before: None,
                send_reminders: None,
                is_anonymous: None,
            },
            None,
        )
        .await
        .unwrap();

        let pair = AssignmentPair {
            evaluator_id: a.id,
            evaluatee_id: b.id,
            evaluator_type: EvaluatorType::Peer,
        };
        let created = EvaluationAssignment::insert(&db.pool, event.id, &pair, "tok-1", None)
            .await
            .unwrap();
        assert_eq!(created.status, AssignmentStatus::Pending);
        assert!(
            EvaluationAssignment::insert(&db.pool, event.id, &pair, "tok-2", None)
                .await
                .is_err()
        );

        let submitted =
            EvaluationAssignment::submit(&db.pool, created.id, &serde_json::json!({"q1": 5}))
                .await
                .unwrap()
                .unwrap();
        assert_eq!(submitted.status, AssignmentStatus::Completed);
        assert!(submitted.completed_at.is_some());
        assert_eq!(
            EvaluationAssignment::delete_if_unanswered(&db.pool, created.id).await.unwrap(),
            0
        );

        let counts = EvaluationAssignment::count_by_status(&db.pool, event.id).await.unwrap();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.completed, 1);

        EvaluationEvent::update_status(
            &db.pool,
            event.id,
            EvaluationStatus::Draft,
            EvaluationStatus::Active,
        )
        .await
        .unwrap();
        let mine = EvaluationAssignment::find_for_evaluator(&db.pool, a.id).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].evaluatee_name, "B");
    }
}
