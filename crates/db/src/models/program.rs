use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

use super::organization::ActiveStatus;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Program {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ActiveStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateProgram {
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct UpdateProgram {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ActiveStatus>,
}

const PROGRAM_COLUMNS: &str =
    "id, organization_id, name, description, status, created_at, updated_at";

impl Program {
    pub async fn create(pool: &SqlitePool, data: &CreateProgram) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Program>(&format!(
            r#"INSERT INTO programs (id, organization_id, name, description, status, created_at, updated_at)
               VALUES ($1, $2, $3, $4, 'active', $5, $5)
               RETURNING {PROGRAM_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(data.organization_id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Program>(&format!(
            "SELECT {PROGRAM_COLUMNS} FROM programs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// All programs, or only `program_id` when the caller is program-scoped.
    pub async fn find_all(
        pool: &SqlitePool,
        program_id: Option<Uuid>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Program>(&format!(
            r#"SELECT {PROGRAM_COLUMNS} FROM programs
               WHERE ($1 IS NULL OR id = $1)
               ORDER BY name"#
        ))
        .bind(program_id)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateProgram,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Program>(&format!(
            r#"UPDATE programs SET
                   name = COALESCE($2, name),
                   description = COALESCE($3, description),
                   status = COALESCE($4, status),
                   updated_at = $5
               WHERE id = $1
               RETURNING {PROGRAM_COLUMNS}"#
        ))
        .bind(id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.status)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support;

    #[tokio::test]
    async fn scoped_listing_returns_only_that_program() {
        let db = test_support::db().await;
        let a = test_support::program(&db).await;
        let _b = test_support::program(&db).await;

        assert_eq!(Program::find_all(&db.pool, None).await.unwrap().len(), 2);
        let scoped = Program::find_all(&db.pool, Some(a.id)).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, a.id);
    }
}
