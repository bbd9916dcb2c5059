use async_trait::async_trait;
use sqlx::PgPool;

use super::{RepoResult, RoleRepository};
use crate::models::Role;

/// Postgres role repository
#[derive(Clone)]
pub struct PgRoleRepository {
    pool: PgPool,
}

impl PgRoleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleRepository for PgRoleRepository {
    async fn find_by_name(&self, name: &str) -> RepoResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, name, slug, description, level FROM roles WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }
}
