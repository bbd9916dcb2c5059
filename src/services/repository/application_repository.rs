use async_trait::async_trait;
use sqlx::PgPool;

use super::{ApplicationRepository, RepoResult};
use crate::models::{Application, ApplicationInput};

/// Postgres application repository
#[derive(Clone)]
pub struct PgApplicationRepository {
    pool: PgPool,
}

impl PgApplicationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApplicationRepository for PgApplicationRepository {
    async fn get_all(&self, package_name: &str) -> RepoResult<Vec<Application>> {
        let rows = sqlx::query_as::<_, Application>(
            "SELECT id, package_name, key, value, description, group_name, created_at, updated_at \
             FROM applications WHERE package_name = $1 ORDER BY group_name, key",
        )
        .bind(package_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_package_names(&self) -> RepoResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT package_name FROM applications ORDER BY package_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn find_package_by_api_key(&self, api_key: &str) -> RepoResult<Option<String>> {
        let package = sqlx::query_scalar::<_, String>(
            "SELECT package_name FROM applications WHERE key = 'api_key' AND value = $1 LIMIT 1",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(package)
    }

    async fn upsert_many(&self, inputs: &[ApplicationInput]) -> RepoResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for input in inputs {
            let result = sqlx::query(
                "INSERT INTO applications (package_name, key, value, description, group_name) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (package_name, key) DO UPDATE SET \
                     value = EXCLUDED.value, \
                     description = COALESCE(EXCLUDED.description, applications.description), \
                     group_name = EXCLUDED.group_name, \
                     updated_at = NOW()",
            )
            .bind(&input.package_name)
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

    async fn delete_package(&self, package_name: &str) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM applications WHERE package_name = $1")
            .bind(package_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
