use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{RepoResult, RepositoryError, UserRepository};
use crate::models::{NewUser, ProfileUpdate, User};

const USER_COLUMNS: &str = "u.id, u.email, u.password_hash, u.full_name, u.phone, u.avatar_url, \
     u.role_id, r.name AS role_name, r.level AS role_level, u.is_active, u.is_verified, \
     u.email_verified_at, u.last_login_at, u.created_at, u.updated_at, u.deleted_at";

/// Postgres user repository
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u LEFT JOIN roles r ON r.id = u.role_id \
             WHERE u.email = $1 AND u.deleted_at IS NULL"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser, role_id: Option<Uuid>) -> RepoResult<User> {
        let mut tx = self.pool.begin().await?;
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, full_name, phone, avatar_url, role_id, \
                                is_active, is_verified, email_verified_at) \
             VALUES ($1, $2, $3, $4, $5, $6, \
                     COALESCE($7, (SELECT id FROM roles WHERE name = 'user')), \
                     TRUE, $8, CASE WHEN $8 THEN NOW() END)",
        )
        .bind(id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(&user.phone)
        .bind(&user.avatar_url)
        .bind(role_id)
        .bind(user.is_verified)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u LEFT JOIN roles r ON r.id = u.role_id WHERE u.id = $1"
        );
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        // Dropping the transaction on any error above rolls it back.
        tx.commit().await?;
        Ok(created)
    }

    async fn set_email_verified(&self, id: Uuid) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE users SET is_verified = TRUE, email_verified_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> RepoResult<()> {
        if update.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "UPDATE users SET full_name = COALESCE($2, full_name), \
                              phone = COALESCE($3, phone), \
                              avatar_url = COALESCE($4, avatar_url), \
                              updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(&update.full_name)
        .bind(&update.phone)
        .bind(&update.avatar_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid) -> RepoResult<()> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
