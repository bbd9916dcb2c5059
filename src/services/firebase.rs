//! Firebase identity provider.
//!
//! ID tokens are verified locally against Google's securetoken JWKS; the
//! signing keys are cached and refreshed when an unknown `kid` shows up.
//! Credential operations go through the Identity Toolkit REST API, which
//! also delivers the reset and verification emails.

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::identity::{IdentityClaims, IdentityError, IdentityProvider, SignUp};
use crate::config::FirebaseConfig;

/// How long fetched signing keys are trusted
const JWKS_TTL: Duration = Duration::from_secs(3600);
/// Minimum spacing between forced JWKS refreshes
const JWKS_MIN_REFRESH: Duration = Duration::from_secs(5);
/// Clock skew tolerated on `exp`, `iat` and `auth_time`
const LEEWAY_SECS: u64 = 60;

#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Raw Firebase ID token claims
#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    iat: i64,
    #[serde(default)]
    auth_time: Option<i64>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    role_level: Option<i64>,
    #[serde(default)]
    admin: bool,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolkitErrorBody {
    error: ToolkitError,
}

#[derive(Debug, Deserialize)]
struct ToolkitError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    id_token: String,
    local_id: String,
}

/// Firebase-backed [`IdentityProvider`]
#[derive(Clone)]
pub struct FirebaseIdentity {
    project_id: String,
    web_api_key: String,
    jwks_url: String,
    toolkit_url: String,
    http: reqwest::Client,
    jwks: Arc<RwLock<Option<CachedJwks>>>,
}

impl std::fmt::Debug for FirebaseIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseIdentity")
            .field("project_id", &self.project_id)
            .field("jwks_url", &self.jwks_url)
            .finish()
    }
}

impl FirebaseIdentity {
    pub fn new(config: &FirebaseConfig) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| IdentityError::Unavailable(format!("http client: {e}")))?;

        if config.project_id.is_empty() {
            warn!("Firebase project id is empty; ID token verification will fail");
        }

        Ok(Self {
            project_id: config.project_id.clone(),
            web_api_key: config.web_api_key.clone(),
            jwks_url: config.jwks_url.clone(),
            toolkit_url: config.identity_toolkit_url.trim_end_matches('/').to_string(),
            http,
            jwks: Arc::new(RwLock::new(None)),
        })
    }

    fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    /// Find a signing key, refreshing the set once if the kid is unknown
    async fn signing_key(&self, kid: &str) -> Result<Jwk, IdentityError> {
        {
            let cache = self.jwks.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < JWKS_TTL {
                    if let Some(jwk) = cached.jwks.find(kid) {
                        return Ok(jwk.clone());
                    }
                }
            }
        }

        let jwks = self.refresh_jwks().await?;
        jwks.find(kid)
            .cloned()
            .ok_or_else(|| IdentityError::InvalidToken("unknown signing key".to_string()))
    }

    async fn refresh_jwks(&self) -> Result<JwkSet, IdentityError> {
        let mut cache = self.jwks.write().await;

        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < JWKS_MIN_REFRESH {
                return Ok(cached.jwks.clone());
            }
        }

        info!(jwks_url = %self.jwks_url, "Fetching Firebase signing keys");
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IdentityError::Unavailable(format!("jwks fetch: {e}")))?
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("jwks decode: {e}")))?;

        debug!(keys = jwks.keys.len(), "Firebase signing keys cached");
        *cache = Some(CachedJwks {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        Ok(jwks)
    }

    /// POST to an Identity Toolkit endpoint, mapping provider error codes
    async fn toolkit_call(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, IdentityError> {
        if self.web_api_key.is_empty() {
            return Err(IdentityError::NotConfigured("FIREBASE_WEB_API_KEY"));
        }

        let url = format!("{}/accounts:{method}", self.toolkit_url);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.web_api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| IdentityError::Unavailable(format!("decode {method}: {e}")));
        }

        if status.is_server_error() {
            return Err(IdentityError::Unavailable(format!("{method} returned {status}")));
        }

        let message = response
            .json::<ToolkitErrorBody>()
            .await
            .map(|b| b.error.message)
            .unwrap_or_else(|_| status.to_string());
        Err(map_toolkit_error(&message))
    }
}

/// Map Identity Toolkit error codes (`EMAIL_EXISTS`, `WEAK_PASSWORD : ...`)
fn map_toolkit_error(message: &str) -> IdentityError {
    let code = message.split([' ', ':']).next().unwrap_or_default();
    match code {
        "EMAIL_EXISTS" => IdentityError::EmailExists,
        "EMAIL_NOT_FOUND" => IdentityError::EmailNotFound,
        "WEAK_PASSWORD" => IdentityError::WeakPassword,
        "INVALID_ID_TOKEN" | "USER_NOT_FOUND" | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => {
            IdentityError::InvalidToken(code.to_ascii_lowercase())
        }
        "TOKEN_EXPIRED" => IdentityError::Expired,
        other => IdentityError::Rejected(other.to_string()),
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn verify_id_token(&self, id_token: &str) -> Result<IdentityClaims, IdentityError> {
        if self.project_id.is_empty() {
            return Err(IdentityError::NotConfigured("FIREBASE_PROJECT_ID"));
        }

        let header = decode_header(id_token)
            .map_err(|e| IdentityError::InvalidToken(format!("header: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(IdentityError::InvalidToken("unexpected algorithm".to_string()));
        }
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::InvalidToken("missing kid".to_string()))?;

        let jwk = self.signing_key(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| IdentityError::InvalidToken(format!("signing key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[self.issuer()]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "aud", "iss"]);
        validation.leeway = LEEWAY_SECS;

        let claims = decode::<FirebaseClaims>(id_token, &key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => IdentityError::Expired,
                _ => IdentityError::InvalidToken(e.to_string()),
            })?
            .claims;

        if claims.sub.is_empty() {
            return Err(IdentityError::InvalidToken("empty subject".to_string()));
        }

        let now = chrono::Utc::now().timestamp();
        if let Some(auth_time) = claims.auth_time {
            if auth_time > now + LEEWAY_SECS as i64 {
                return Err(IdentityError::InvalidToken("auth_time in the future".to_string()));
            }
        }

        Ok(IdentityClaims {
            subject: claims.sub,
            email: claims.email,
            name: claims.name,
            picture: claims.picture,
            phone_number: claims.phone_number,
            email_verified: claims.email_verified,
            issued_at: claims.iat,
            role_level: claims.role_level,
            admin: claims.admin,
            role: claims.role,
        })
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<SignUp, IdentityError> {
        let value = self
            .toolkit_call(
                "signUp",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        let created: SignUpResponse = serde_json::from_value(value)
            .map_err(|e| IdentityError::Unavailable(format!("decode signUp: {e}")))?;

        if let Some(name) = display_name.filter(|n| !n.trim().is_empty()) {
            // The account exists at this point; a failed profile update is not fatal.
            if let Err(e) = self
                .toolkit_call(
                    "update",
                    json!({ "idToken": created.id_token, "displayName": name, "returnSecureToken": false }),
                )
                .await
            {
                warn!(error = %e, "Failed to set display name after sign-up");
            }
        }

        Ok(SignUp {
            subject: created.local_id,
            id_token: created.id_token,
        })
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), IdentityError> {
        self.toolkit_call(
            "sendOobCode",
            json!({ "requestType": "PASSWORD_RESET", "email": email }),
        )
        .await?;
        Ok(())
    }

    async fn send_email_verification(&self, id_token: &str) -> Result<(), IdentityError> {
        self.toolkit_call(
            "sendOobCode",
            json!({ "requestType": "VERIFY_EMAIL", "idToken": id_token }),
        )
        .await?;
        Ok(())
    }

    async fn change_password(
        &self,
        id_token: &str,
        new_password: &str,
    ) -> Result<(), IdentityError> {
        self.toolkit_call(
            "update",
            json!({ "idToken": id_token, "password": new_password, "returnSecureToken": false }),
        )
        .await?;
        Ok(())
    }
}
