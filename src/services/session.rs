//! Sessions, CSRF tokens and revocation markers.

use rand::distr::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::store::{EphemeralStore, StoreResult};
use crate::models::User;

/// CSRF token lifetime
pub const CSRF_TTL: Duration = Duration::from_secs(60);
/// Session snapshot lifetime
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Revocation marker lifetime; matches the ID token lifetime
pub const REVOCATION_TTL: Duration = Duration::from_secs(60 * 60);

const CSRF_TOKEN_LEN: usize = 32;

pub fn csrf_key(token: &str) -> String {
    format!("csrf:{token}")
}

pub fn session_key(user_id: Uuid) -> String {
    format!("session:{user_id}")
}

pub fn revocation_key(subject: &str) -> String {
    format!("revoked_token:{subject}")
}

/// Session-related ephemeral state
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn EphemeralStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }

    /// Issue a CSRF token valid for [`CSRF_TTL`]
    pub async fn issue_csrf(&self) -> StoreResult<String> {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(CSRF_TOKEN_LEN)
            .map(char::from)
            .collect();

        self.store.set(&csrf_key(&token), &token, CSRF_TTL).await?;
        Ok(token)
    }

    /// Consume a CSRF token; a token is accepted at most once
    pub async fn consume_csrf(&self, token: &str) -> StoreResult<bool> {
        let stored = self.store.take(&csrf_key(token)).await?;
        Ok(stored.is_some_and(|value| !value.is_empty()))
    }

    /// Store the user snapshot for this session
    pub async fn save_session(&self, user: &User) -> StoreResult<()> {
        let snapshot = serde_json::to_string(user)
            .map_err(|e| super::store::StoreError::Command(format!("encode session: {e}")))?;
        self.store
            .set(&session_key(user.id), &snapshot, SESSION_TTL)
            .await
    }

    /// Remove every session entry of a user
    pub async fn clear_sessions(&self, user_id: Uuid) -> StoreResult<u64> {
        let pattern = format!("{}*", session_key(user_id));
        let keys = self.store.scan_keys(&pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete(&keys).await?;
        debug!(%user_id, removed, "Sessions cleared");
        Ok(removed)
    }

    /// Record that tokens of `subject` issued up to now are revoked
    pub async fn mark_revoked(&self, subject: &str) -> StoreResult<()> {
        let now = chrono::Utc::now().timestamp();
        self.store
            .set(&revocation_key(subject), &now.to_string(), REVOCATION_TTL)
            .await
    }

    /// Whether a token issued at `issued_at` predates a revocation
    pub async fn is_revoked(&self, subject: &str, issued_at: i64) -> StoreResult<bool> {
        let marker = self.store.get(&revocation_key(subject)).await?;
        Ok(marker
            .and_then(|value| value.parse::<i64>().ok())
            .is_some_and(|revoked_at| issued_at <= revoked_at))
    }
}
