use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
    pub is_secret: bool,
    pub updated_at: DateTime<Utc>,
}

impl SystemSetting {
    pub const SECRET_MASK: &'static str = "********";

    pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, SystemSetting>(
            "SELECT key, value, is_secret, updated_at FROM system_settings WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, SystemSetting>(
            "SELECT key, value, is_secret, updated_at FROM system_settings ORDER BY key",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn upsert(
        pool: &SqlitePool,
        key: &str,
        value: &str,
        is_secret: bool,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, SystemSetting>(
            r#"INSERT INTO system_settings (key, value, is_secret, updated_at)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   is_secret = excluded.is_secret,
                   updated_at = excluded.updated_at
               RETURNING key, value, is_secret, updated_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(is_secret)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    /// Copy safe to return over the API.
    pub fn masked(mut self) -> Self {
        if self.is_secret && !self.value.is_empty() {
            self.value = Self::SECRET_MASK.to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support;

    #[tokio::test]
    async fn secrets_are_masked_on_read() {
        let db = test_support::db().await;
        SystemSetting::upsert(&db.pool, "sendgrid_api_key", "SG.real", true)
            .await
            .unwrap();
        SystemSetting::upsert(&db.pool, "sendgrid_from_email", "a@b.c", false)
            .await
            .unwrap();

        let all: Vec<_> = SystemSetting::find_all(&db.pool)
            .await
            .unwrap()
            .into_iter()
            .map(SystemSetting::masked)
            .collect();
        assert_eq!(all[0].key, "sendgrid_api_key");
        assert_eq!(all[0].value, SystemSetting::SECRET_MASK);
        assert_eq!(all[1].value, "a@b.c");

        let raw = SystemSetting::get(&db.pool, "sendgrid_api_key").await.unwrap().unwrap();
        assert_eq!(raw.value, "SG.real");
    }
}
