//! Authentication flows.
//!
//! Identity lives with the external provider; this service turns a verified
//! ID token into a local principal. Unknown emails are provisioned
//! just-in-time, and provider-side profile facts are reconciled into the
//! local row on every authentication.

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::identity::{IdentityClaims, IdentityError, IdentityProvider};
use super::repository::{RepositoryError, RoleRepository, UserRepository};
use super::session::SessionStore;
use crate::error::{AppError, Result};
use crate::models::{FieldError, NewUser, ProfileUpdate, RoleLevel, User, DEFAULT_FULL_NAME};

/// Length of the random local password given to federated users
const GENERATED_PASSWORD_LEN: usize = 32;

/// Minimum password length
pub const MIN_PASSWORD_LEN: usize = 8;

/// Substrings that make a password weak regardless of its composition
const WEAK_PASSWORDS: &[&str] = &["password", "123456", "qwerty", "12345678", "12345", "1234"];

/// An authenticated caller
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    pub role: RoleLevel,
    /// Identity provider subject
    pub subject: String,
}

/// Registration payload: either an ID token or credentials
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RegisterRequest {
    IdToken {
        id_token: String,
    },
    Credentials {
        #[serde(default)]
        email: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        full_name: Option<String>,
        #[serde(default)]
        phone: Option<String>,
        #[serde(default)]
        avatar_url: Option<String>,
    },
}

/// Check password composition; returns the reason it is rejected
pub fn check_password_strength(password: &str) -> std::result::Result<(), &'static str> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err("Password must be at least 8 characters");
    }

    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    if !(has_upper && has_lower && has_digit && has_symbol) {
        return Err(
            "Password must contain an uppercase letter, a lowercase letter, a digit and a symbol",
        );
    }

    let lowered = password.to_lowercase();
    if WEAK_PASSWORDS.iter().any(|weak| lowered.contains(weak)) {
        return Err("Password is too common");
    }

    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(str::trim).unwrap_or_default().is_empty()
}

/// Role of a principal: local role first, then token claims, then `user`
pub fn resolve_role(user: &User, claims: &IdentityClaims) -> RoleLevel {
    user.role()
        .or_else(|| claims.role_level.and_then(RoleLevel::from_level))
        .or_else(|| claims.admin.then_some(RoleLevel::Admin))
        .or_else(|| claims.role.as_deref().and_then(RoleLevel::from_name))
        .unwrap_or(RoleLevel::User)
}

/// Map a token verification failure to a masked 401, counting it
pub fn token_error(err: IdentityError) -> AppError {
    metrics::counter!("auth_jwt_errors_total", "reason" => err.reason()).increment(1);
    debug!(error = %err, "ID token rejected");
    match err {
        IdentityError::Revoked => AppError::unauthorized("Unauthorized - Token has been revoked"),
        _ => AppError::unauthorized("Unauthorized - Invalid or expired token"),
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    roles: Arc<dyn RoleRepository>,
    identity: Arc<dyn IdentityProvider>,
    sessions: SessionStore,
    check_revoked: bool,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        roles: Arc<dyn RoleRepository>,
        identity: Arc<dyn IdentityProvider>,
        sessions: SessionStore,
        check_revoked: bool,
    ) -> Self {
        Self {
            users,
            roles,
            identity,
            sessions,
            check_revoked,
        }
    }

    /// Verify an ID token, including the revocation marker when enabled
    pub async fn verify_token(&self, id_token: &str) -> std::result::Result<IdentityClaims, IdentityError> {
        let claims = self.identity.verify_id_token(id_token).await?;

        if self.check_revoked {
            match self.sessions.is_revoked(&claims.subject, claims.issued_at).await {
                Ok(true) => return Err(IdentityError::Revoked),
                Ok(false) => {}
                Err(e) => {
                    return Err(IdentityError::Unavailable(format!("revocation check: {e}")));
                }
            }
        }

        Ok(claims)
    }

    /// Map verified claims to a local principal, provisioning on first sight
    pub async fn resolve_principal(&self, claims: &IdentityClaims) -> Result<Principal> {
        let email = claims
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AppError::unauthorized("Unauthorized - Email claim is missing"))?;

        let mut user = match self.users.find_by_email(&email).await? {
            Some(user) => user,
            None => self.provision(&email, claims).await?,
        };

        self.reconcile(&mut user, claims).await;

        if !user.is_active {
            return Err(AppError::forbidden("User account is inactive"));
        }

        let role = resolve_role(&user, claims);
        Ok(Principal {
            user,
            role,
            subject: claims.subject.clone(),
        })
    }

    /// Create the local user for a first-time identity
    async fn provision(&self, email: &str, claims: &IdentityClaims) -> Result<User> {
        let role_id = self.roles.find_by_name(RoleLevel::User.name()).await?.map(|r| r.id);

        let password: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_PASSWORD_LEN)
            .map(char::from)
            .collect();
        let password_hash = hash_password(password).await?;

        let new_user = NewUser {
            email: email.to_string(),
            password_hash,
            full_name: non_blank(claims.name.as_deref())
                .unwrap_or_else(|| DEFAULT_FULL_NAME.to_string()),
            phone: non_blank(claims.phone_number.as_deref()),
            avatar_url: non_blank(claims.picture.as_deref()),
            is_verified: claims.email_verified,
        };

        match self.users.create(new_user, role_id).await {
            Ok(user) => {
                info!(user_id = %user.id, email, "User provisioned");
                Ok(user)
            }
            // A concurrent first login won the insert; use its row
            Err(RepositoryError::Conflict(_)) => {
                debug!(email, "Concurrent provisioning detected, reading existing user");
                self.users
                    .find_by_email(email)
                    .await?
                    .ok_or_else(|| AppError::internal("user vanished after unique conflict"))
            }
            Err(e) => Err(AppError::internal(format!("user provisioning failed: {e}"))),
        }
    }

    /// Bring provider facts into the local row; failures are logged only
    async fn reconcile(&self, user: &mut User, claims: &IdentityClaims) {
        if claims.email_verified && !user.is_verified {
            match self.users.set_email_verified(user.id).await {
                Ok(()) => user.is_verified = true,
                Err(e) => warn!(user_id = %user.id, error = %e, "Failed to mark email verified"),
            }
        }

        let update = ProfileUpdate {
            full_name: non_blank(claims.name.as_deref()).filter(|_| user.has_placeholder_name()),
            phone: non_blank(claims.phone_number.as_deref())
                .filter(|_| is_blank(user.phone.as_deref())),
            avatar_url: non_blank(claims.picture.as_deref())
                .filter(|_| is_blank(user.avatar_url.as_deref())),
        };

        if update.is_empty() {
            return;
        }

        match self.users.update_profile(user.id, &update).await {
            Ok(()) => {
                if let Some(name) = update.full_name {
                    user.full_name = name;
                }
                if update.phone.is_some() {
                    user.phone = update.phone;
                }
                if update.avatar_url.is_some() {
                    user.avatar_url = update.avatar_url;
                }
            }
            Err(e) => warn!(user_id = %user.id, error = %e, "Failed to reconcile profile"),
        }
    }

    /// Record a successful sign-in: last login and session snapshot
    async fn start_session(&self, principal: &Principal) {
        if let Err(e) = self.users.touch_last_login(principal.user.id).await {
            warn!(user_id = %principal.user.id, error = %e, "Failed to update last login");
        }
        if let Err(e) = self.sessions.save_session(&principal.user).await {
            warn!(user_id = %principal.user.id, error = %e, "Failed to store session");
        }
    }

    /// Sign in with a provider ID token
    pub async fn login(&self, id_token: &str) -> Result<Principal> {
        let claims = self.verify_token(id_token).await.map_err(token_error)?;
        let principal = self.resolve_principal(&claims).await?;
        self.start_session(&principal).await;
        Ok(principal)
    }

    /// Register by ID token, or create the provider account from credentials
    pub async fn register(&self, request: RegisterRequest) -> Result<Principal> {
        match request {
            RegisterRequest::IdToken { id_token } => self.login(&id_token).await,
            RegisterRequest::Credentials {
                email,
                password,
                full_name,
                phone,
                avatar_url,
            } => {
                let email = email.trim().to_lowercase();
                let mut errors = Vec::new();
                if email.is_empty() {
                    errors.push(FieldError::new("email", "Email is required"));
                } else if !email.contains('@') {
                    errors.push(FieldError::new("email", "Email is invalid"));
                }
                if let Err(reason) = check_password_strength(&password) {
                    errors.push(FieldError::new("password", reason));
                }
                if !errors.is_empty() {
                    return Err(AppError::validation("Validation failed", errors));
                }

                let full_name = non_blank(full_name.as_deref());
                let created = self
                    .identity
                    .sign_up(&email, &password, full_name.as_deref())
                    .await?;
                let mut claims = self.identity.verify_id_token(&created.id_token).await?;

                // Fields given at registration take precedence over empty claims
                claims.name = claims.name.or(full_name);
                claims.phone_number = claims.phone_number.or(non_blank(phone.as_deref()));
                claims.picture = claims.picture.or(non_blank(avatar_url.as_deref()));

                let principal = self.resolve_principal(&claims).await?;
                self.start_session(&principal).await;
                Ok(principal)
            }
        }
    }

    /// Ask the provider to email a reset link
    ///
    /// Unknown emails succeed silently so the endpoint cannot be used to
    /// probe for accounts.
    pub async fn send_password_reset(&self, email: &str) -> Result<()> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::validation(
                "Validation failed",
                vec![FieldError::new("email", "Email is invalid")],
            ));
        }

        match self.identity.send_password_reset(&email).await {
            Ok(()) | Err(IdentityError::EmailNotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Ask the provider to email a verification link
    pub async fn send_email_verification(&self, id_token: &str) -> Result<()> {
        self.identity.send_email_verification(id_token).await?;
        Ok(())
    }

    /// Change the password at the provider and mirror its hash locally
    pub async fn change_password(
        &self,
        user_id: Uuid,
        id_token: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(reason) = check_password_strength(new_password) {
            errors.push(FieldError::new("new_password", reason));
        }
        if new_password != confirm_password {
            errors.push(FieldError::new("confirm_password", "Passwords do not match"));
        }
        if !errors.is_empty() {
            return Err(AppError::validation("Validation failed", errors));
        }

        self.identity.change_password(id_token, new_password).await?;

        let hash = hash_password(new_password.to_string()).await?;
        self.users.update_password_hash(user_id, &hash).await?;
        info!(%user_id, "Password changed");
        Ok(())
    }

    /// End every session of a user and revoke their outstanding tokens
    pub async fn logout(&self, user_id: Uuid, subject: &str) -> Result<()> {
        self.sessions.clear_sessions(user_id).await?;
        if !subject.is_empty() {
            self.sessions.mark_revoked(subject).await?;
        }
        Ok(())
    }
}

/// Hash off the async runtime; bcrypt is deliberately slow
async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| AppError::internal(format!("hash task failed: {e}")))?
        .map_err(AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(role_level: Option<i16>) -> User {
        User {
            id: Uuid::new_v4(),
            email: "a@ex.com".into(),
            password_hash: String::new(),
            full_name: DEFAULT_FULL_NAME.into(),
            phone: None,
            avatar_url: None,
            role_id: None,
            role_name: None,
            role_level,
            is_active: true,
            is_verified: false,
            email_verified_at: None,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_password_strength() {
        assert!(check_password_strength("Str0ng!Pass").is_ok());
        assert!(check_password_strength("Sh0rt!").is_err());
        assert!(check_password_strength("alllowercase1!").is_err());
        assert!(check_password_strength("NoDigits!!").is_err());
        assert!(check_password_strength("NoSymbol123").is_err());
        assert_eq!(
            check_password_strength("MyPassword1!"),
            Err("Password is too common")
        );
        assert!(check_password_strength("Abc!1234xyz").is_err());
    }

    #[test]
    fn test_role_prefers_local_role() {
        let claims = IdentityClaims {
            admin: true,
            ..IdentityClaims::default()
        };
        assert_eq!(resolve_role(&user(Some(0)), &claims), RoleLevel::User);
        assert_eq!(resolve_role(&user(None), &claims), RoleLevel::Admin);
    }

    #[test]
    fn test_role_from_claims() {
        let by_level = IdentityClaims {
            role_level: Some(1),
            ..IdentityClaims::default()
        };
        assert_eq!(resolve_role(&user(None), &by_level), RoleLevel::SuperAdmin);

        let by_name = IdentityClaims {
            role: Some("admin".into()),
            ..IdentityClaims::default()
        };
        assert_eq!(resolve_role(&user(None), &by_name), RoleLevel::Admin);

        assert_eq!(
            resolve_role(&user(None), &IdentityClaims::default()),
            RoleLevel::User
        );
    }

    #[test]
    fn test_register_request_shapes() {
        let by_token: RegisterRequest = serde_json::from_str(r#"{"id_token":"t"}"#).unwrap();
        assert!(matches!(by_token, RegisterRequest::IdToken { .. }));

        let by_credentials: RegisterRequest =
            serde_json::from_str(r#"{"email":"a@ex.com","password":"x"}"#).unwrap();
        assert!(matches!(by_credentials, RegisterRequest::Credentials { .. }));
    }
}
