use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type, types::Json};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "questionnaire_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QuestionnaireStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QuestionType {
    Text,
    Textarea,
    Rating,
    Scale,
    SingleChoice,
    MultipleChoice,
    YesNo,
}

impl QuestionType {
    pub fn needs_options(self) -> bool {
        matches!(self, Self::SingleChoice | Self::MultipleChoice)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Questionnaire {
    pub id: Uuid,
    pub program_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: QuestionnaireStatus,
    #[ts(type = "Array<Section>")]
    pub sections: Json<Vec<Section>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateQuestionnaire {
    pub program_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct UpdateQuestionnaire {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<QuestionnaireStatus>,
    pub sections: Option<Vec<Section>>,
}

const QUESTIONNAIRE_COLUMNS: &str =
    "id, program_id, title, description, status, sections, created_by, created_at, updated_at";

impl Questionnaire {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateQuestionnaire,
        created_by: Option<Uuid>,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Questionnaire>(&format!(
            r#"INSERT INTO questionnaires
                   (id, program_id, title, description, status, sections, created_by, created_at, updated_at)
               VALUES ($1, $2, $3, $4, 'draft', $5, $6, $7, $7)
               RETURNING {QUESTIONNAIRE_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(data.program_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(Json(&data.sections))
        .bind(created_by)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Questionnaire>(&format!(
            "SELECT {QUESTIONNAIRE_COLUMNS} FROM questionnaires WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_all(
        pool: &SqlitePool,
        program_id: Option<Uuid>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Questionnaire>(&format!(
            r#"SELECT {QUESTIONNAIRE_COLUMNS} FROM questionnaires
               WHERE ($1 IS NULL OR program_id = $1)
               ORDER BY created_at DESC"#
        ))
        .bind(program_id)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateQuestionnaire,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Questionnaire>(&format!(
            r#"UPDATE questionnaires SET
                   title = COALESCE($2, title),
                   description = COALESCE($3, description),
                   status = COALESCE($4, status),
                   sections = COALESCE($5, sections),
                   updated_at = $6
               WHERE id = $1
               RETURNING {QUESTIONNAIRE_COLUMNS}"#
        ))
        .bind(id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.status)
        .bind(data.sections.as_ref().map(Json))
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM questionnaires WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub fn question_count(&self) -> usize {
        self.sections.iter().map(|s| s.questions.len()).sum()
    }
}
