use async_trait::async_trait;
use sqlx::PgPool;

use super::{RepoResult, RepositoryError, SettingRepository};
use crate::models::{Setting, SettingInput};

const SETTING_COLUMNS: &str =
    "id, scope, key, value, description, group_name, created_at, updated_at";

/// Postgres settings repository
#[derive(Clone)]
pub struct PgSettingRepository {
    pool: PgPool,
}

impl PgSettingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingRepository for PgSettingRepository {
    async fn get_all(&self, scope: &str) -> RepoResult<Vec<Setting>> {
        let sql = format!(
            "SELECT {SETTING_COLUMNS} FROM settings WHERE scope = $1 ORDER BY group_name, key"
        );
        let settings = sqlx::query_as::<_, Setting>(&sql)
            .bind(scope)
            .fetch_all(&self.pool)
            .await?;
        Ok(settings)
    }

    async fn list_scopes(&self) -> RepoResult<Vec<String>> {
        let scopes = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT scope FROM settings ORDER BY scope",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(scopes)
    }

    async fn get_by_key(&self, scope: &str, key: &str) -> RepoResult<Option<Setting>> {
        let sql = format!("SELECT {SETTING_COLUMNS} FROM settings WHERE scope = $1 AND key = $2");
        let setting = sqlx::query_as::<_, Setting>(&sql)
            .bind(scope)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(setting)
    }

    async fn create(&self, scope: &str, input: &SettingInput) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO settings (scope, key, value, description, group_name) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (scope, key) DO NOTHING",
        )
        .bind(scope)
        .bind(&input.key)
        .bind(&input.value)
        .bind(&input.description)
        .bind(&input.group_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_by_key(&self, scope: &str, key: &str, value: &str) -> RepoResult<Setting> {
        let sql = format!(
            "UPDATE settings SET value = $3, updated_at = NOW() \
             WHERE scope = $1 AND key = $2 RETURNING {SETTING_COLUMNS}"
        );
        sqlx::query_as::<_, Setting>(&sql)
            .bind(scope)
            .bind(key)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn update_bulk(&self, scope: &str, inputs: &[SettingInput]) -> RepoResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for input in inputs {
            let result = sqlx::query(
                "INSERT INTO settings (scope, key, value, description, group_name) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (scope, key) DO UPDATE SET \
                     value = EXCLUDED.value, \
                     description = COALESCE(EXCLUDED.description, settings.description), \
                     group_name = EXCLUDED.group_name, \
                     updated_at = NOW()",
            )
            .bind(scope)
            .bind(&input.key)
            .bind(&input.value)
            .bind(&input.description)
            .bind(&input.group_name)
            .execute(&mut *tx)
            .await?;
            affected += result.rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }
}
