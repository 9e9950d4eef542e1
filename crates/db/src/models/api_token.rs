use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// Persisted bearer token. Only the SHA-256 hash of the token is stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ApiToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    pub token_hash: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiToken {
    pub async fn create(
        pool: &SqlitePool,
        user_id: Uuid,
        name: &str,
        token_hash: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, ApiToken>(
            r#"INSERT INTO api_tokens (id, user_id, name, token_hash, expires_at, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, user_id, name, token_hash, last_used_at, expires_at, created_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .bind(token_hash)
        .bind(expires_at)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    /// Token matching `token_hash` that has not expired at `now`.
    pub async fn find_active_by_hash(
        pool: &SqlitePool,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let token = sqlx::query_as::<_, ApiToken>(
            r#"SELECT id, user_id, name, token_hash, last_used_at, expires_at, created_at
               FROM api_tokens
               WHERE token_hash = $1"#,
        )
        .bind(token_hash)
        .fetch_optional(pool)
        .await?;

        Ok(token.filter(|t| t.expires_at.is_none_or(|exp| exp > now)))
    }

    pub async fn touch(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE api_tokens SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::{test_support, user::UserRole};

    #[tokio::test]
    async fn expired_tokens_are_not_returned() {
        let db = test_support::db().await;
        let user = test_support::user(&db, "Cy", UserRole::Admin, None).await;
        let now = Utc::now();

        ApiToken::create(&db.pool, user.id, "live", "h1", None).await.unwrap();
        ApiToken::create(&db.pool, user.id, "old", "h2", Some(now - Duration::minutes(1)))
            .await
            .unwrap();

        assert!(ApiToken::find_active_by_hash(&db.pool, "h1", now).await.unwrap().is_some());
        assert!(ApiToken::find_active_by_hash(&db.pool, "h2", now).await.unwrap().is_none());
        assert!(ApiToken::find_active_by_hash(&db.pool, "nope", now).await.unwrap().is_none());
    }
}
