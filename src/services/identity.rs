//! Identity provider contract.
//!
//! Tokens are minted by the external provider; the edge only verifies them
//! and delegates credential operations. [`super::FirebaseIdentity`] is the
//! production implementation.

use async_trait::async_trait;
use thiserror::Error;

/// Identity provider errors
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("token revoked")]
    Revoked,

    #[error("email already registered")]
    EmailExists,

    #[error("email not found")]
    EmailNotFound,

    #[error("password rejected as weak")]
    WeakPassword,

    #[error("identity provider rejected the request: {0}")]
    Rejected(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("identity provider not configured: {0}")]
    NotConfigured(&'static str),
}

impl IdentityError {
    /// Label used for the JWT error metric
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "invalid",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Unavailable(_) | Self::NotConfigured(_) => "unavailable",
            Self::EmailExists | Self::EmailNotFound | Self::WeakPassword | Self::Rejected(_) => {
                "rejected"
            }
        }
    }
}

/// Verified claims of an ID token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityClaims {
    /// Provider subject (uid)
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub phone_number: Option<String>,
    pub email_verified: bool,
    /// Issued-at, unix seconds
    pub issued_at: i64,
    /// Custom claim: numeric role level
    pub role_level: Option<i64>,
    /// Custom claim: admin flag
    pub admin: bool,
    /// Custom claim: role name
    pub role: Option<String>,
}

/// Result of an email/password sign-up
#[derive(Debug, Clone)]
pub struct SignUp {
    pub subject: String,
    pub id_token: String,
}

/// Capability set of the external identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify signature, expiry, issuer and audience of an ID token
    async fn verify_id_token(&self, id_token: &str) -> Result<IdentityClaims, IdentityError>;

    /// Create an email/password account
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<SignUp, IdentityError>;

    /// Have the provider email a password-reset link
    async fn send_password_reset(&self, email: &str) -> Result<(), IdentityError>;

    /// Have the provider email a verification link to the token's owner
    async fn send_email_verification(&self, id_token: &str) -> Result<(), IdentityError>;

    /// Change the password of the token's owner
    async fn change_password(&self, id_token: &str, new_password: &str)
        -> Result<(), IdentityError>;
}
