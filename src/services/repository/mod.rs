//! Repository traits over the relational store.
//!
//! The edge talks to users, roles, settings and applications through these
//! capability sets. Postgres implementations live alongside; tests swap in
//! in-memory ones.

mod application_repository;
mod role_repository;
mod setting_repository;
mod user_repository;

pub use application_repository::PgApplicationRepository;
pub use role_repository::PgRoleRepository;
pub use setting_repository::PgSettingRepository;
pub use user_repository::PgUserRepository;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Application, ApplicationInput, NewUser, ProfileUpdate, Role, Setting, SettingInput, User,
};

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Self::Conflict(db.constraint().unwrap_or("unique constraint").to_string())
            }
            other => Self::Database(other),
        }
    }
}

pub type RepoResult<T> = std::result::Result<T, RepositoryError>;

/// User persistence
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find a non-deleted user by email, joined with its role
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>>;

    /// Insert a user in one transaction
    ///
    /// When `role_id` is `None` the default `user` role is assigned. A
    /// duplicate email yields [`RepositoryError::Conflict`].
    async fn create(&self, user: NewUser, role_id: Option<Uuid>) -> RepoResult<User>;

    async fn set_email_verified(&self, id: Uuid) -> RepoResult<()>;

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> RepoResult<()>;

    async fn touch_last_login(&self, id: Uuid) -> RepoResult<()>;

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> RepoResult<()>;
}

/// Role lookups
#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn find_by_name(&self, name: &str) -> RepoResult<Option<Role>>;
}

/// Scoped settings persistence
#[async_trait]
pub trait SettingRepository: Send + Sync {
    /// All settings of a scope, ordered by group then key
    async fn get_all(&self, scope: &str) -> RepoResult<Vec<Setting>>;

    async fn list_scopes(&self) -> RepoResult<Vec<String>>;

    async fn get_by_key(&self, scope: &str, key: &str) -> RepoResult<Option<Setting>>;

    /// Insert unless `(scope, key)` already exists
    async fn create(&self, scope: &str, input: &SettingInput) -> RepoResult<()>;

    /// Update the value of an existing setting
    async fn update_by_key(&self, scope: &str, key: &str, value: &str) -> RepoResult<Setting>;

    /// Upsert many settings in one transaction
    async fn update_bulk(&self, scope: &str, inputs: &[SettingInput]) -> RepoResult<u64>;
}

/// Mobile application rows persistence
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn get_all(&self, package_name: &str) -> RepoResult<Vec<Application>>;

    async fn list_package_names(&self) -> RepoResult<Vec<String>>;

    /// Resolve the package owning an `api_key` row
    async fn find_package_by_api_key(&self, api_key: &str) -> RepoResult<Option<String>>;

    /// Upsert rows on `(package_name, key)` in one transaction
    async fn upsert_many(&self, inputs: &[ApplicationInput]) -> RepoResult<u64>;

    /// Remove every row of a package
    async fn delete_package(&self, package_name: &str) -> RepoResult<u64>;
}
