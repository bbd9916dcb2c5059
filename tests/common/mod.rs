//! Common test utilities and helpers.
//!
//! Integration tests run the real router over a loopback socket. The
//! relational repositories, the identity provider and the ephemeral store
//! are replaced by in-process fakes so no external service is needed.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use reqwest::RequestBuilder;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

use video_api_edge::{
    config::Config,
    create_router,
    models::{
        Application, ApplicationInput, NewUser, ProfileUpdate, Role, RoleLevel, Setting,
        SettingInput, User,
    },
    services::{
        identity::SignUp,
        repository::{
            ApplicationRepository, RepoResult, RepositoryError, RoleRepository,
            SettingRepository, UserRepository,
        },
        store::{Counter, Expiry, StoreError, StoreResult},
        AlertNotifier, EphemeralStore, IdentityClaims, IdentityError, IdentityProvider,
        MemoryStore,
    },
    AppState, StateParts,
};

pub const MOBILE_KEY: &str = "AK1";
pub const PACKAGE: &str = "com.example.video";
pub const WEB_KEY: &str = "WK1";
pub const ADMIN_TOKEN: &str = "admin-token";
pub const USER_TOKEN: &str = "user-token";

// -------------------------------------------------------------------------
// Ephemeral store
// -------------------------------------------------------------------------

/// In-process store that counts client-config cache reads
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    client_reads: AtomicUsize,
    reject_revocations: AtomicBool,
}

impl CountingStore {
    /// Number of `get` calls against `client:*` keys
    pub fn client_reads(&self) -> usize {
        self.client_reads.load(Ordering::SeqCst)
    }

    /// Make writes of token revocation markers fail from now on
    pub fn reject_revocations(&self) {
        self.reject_revocations.store(true, Ordering::SeqCst);
    }

    /// Read a key without counting it
    pub async fn peek(&self, key: &str) -> Option<String> {
        self.inner.get(key).await.ok().flatten()
    }
}

#[async_trait]
impl EphemeralStore for CountingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        if key.starts_with("client:") {
            self.client_reads.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        if key.starts_with("revoked_token:") && self.reject_revocations.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn set_many(&self, entries: &[(String, String)], ttl: Duration) -> StoreResult<()> {
        self.inner.set_many(entries, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        self.inner.delete(keys).await
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.take(key).await
    }

    async fn increment(&self, key: &str, window: Duration, expiry: Expiry) -> StoreResult<Counter> {
        self.inner.increment(key, window, expiry).await
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.inner.scan_keys(pattern).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

// -------------------------------------------------------------------------
// Repositories
// -------------------------------------------------------------------------

fn seeded_roles() -> Vec<Role> {
    [RoleLevel::User, RoleLevel::SuperAdmin, RoleLevel::Admin]
        .into_iter()
        .map(|level| Role {
            id: Uuid::new_v4(),
            name: level.name().to_string(),
            slug: level.name().to_string(),
            description: None,
            level: level as i16,
        })
        .collect()
}

pub struct InMemoryRoles {
    roles: Vec<Role>,
}

impl InMemoryRoles {
    pub fn new(roles: Vec<Role>) -> Self {
        Self { roles }
    }

    pub fn by_level(&self, level: RoleLevel) -> Option<&Role> {
        self.roles.iter().find(|r| r.level == level as i16)
    }
}

#[async_trait]
impl RoleRepository for InMemoryRoles {
    async fn find_by_name(&self, name: &str) -> RepoResult<Option<Role>> {
        Ok(self.roles.iter().find(|r| r.name == name).cloned())
    }
}

pub struct InMemoryUsers {
    users: Mutex<Vec<User>>,
    roles: Vec<Role>,
}

impl InMemoryUsers {
    pub fn new(roles: Vec<Role>) -> Self {
        Self {
            users: Mutex::new(Vec::new()),
            roles,
        }
    }

    pub fn count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn get(&self, email: &str) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned()
    }

    /// Insert a verified user holding the given role
    pub fn insert(&self, email: &str, level: RoleLevel) -> User {
        let role = self.roles.iter().find(|r| r.level == level as i16).cloned();
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            full_name: "Seeded User".to_string(),
            role_id: role.as_ref().map(|r| r.id),
            role_name: role.as_ref().map(|r| r.name.clone()),
            role_level: role.as_ref().map(|r| r.level),
            is_active: true,
            is_verified: true,
            email_verified_at: Some(now),
            created_at: now,
            updated_at: now,
            ..User::default()
        };
        self.users.lock().unwrap().push(user.clone());
        user
    }

    fn update(&self, id: Uuid, apply: impl FnOnce(&mut User)) -> RepoResult<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(RepositoryError::NotFound)?;
        apply(user);
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email) && u.deleted_at.is_none())
            .cloned())
    }

    async fn create(&self, user: NewUser, role_id: Option<Uuid>) -> RepoResult<User> {
        let role = role_id
            .and_then(|id| self.roles.iter().find(|r| r.id == id))
            .or_else(|| self.roles.iter().find(|r| r.level == RoleLevel::User as i16))
            .cloned();

        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(RepositoryError::Conflict("users_email_key".to_string()));
        }

        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            full_name: user.full_name,
            phone: user.phone,
            avatar_url: user.avatar_url,
            role_id: role.as_ref().map(|r| r.id),
            role_name: role.as_ref().map(|r| r.name.clone()),
            role_level: role.as_ref().map(|r| r.level),
            is_active: true,
            is_verified: user.is_verified,
            email_verified_at: user.is_verified.then_some(now),
            last_login_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        users.push(created.clone());
        Ok(created)
    }

    async fn set_email_verified(&self, id: Uuid) -> RepoResult<()> {
        self.update(id, |u| {
            u.is_verified = true;
            u.email_verified_at = Some(Utc::now());
        })
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> RepoResult<()> {
        self.update(id, |u| {
            if let Some(name) = &update.full_name {
                u.full_name = name.clone();
            }
            if update.phone.is_some() {
                u.phone = update.phone.clone();
            }
            if update.avatar_url.is_some() {
                u.avatar_url = update.avatar_url.clone();
            }
        })
    }

    async fn touch_last_login(&self, id: Uuid) -> RepoResult<()> {
        self.update(id, |u| u.last_login_at = Some(Utc::now()))
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> RepoResult<()> {
        self.update(id, |u| u.password_hash = password_hash.to_string())
    }
}

#[derive(Default)]
pub struct InMemorySettings {
    rows: Mutex<Vec<Setting>>,
    writes: AtomicUsize,
}

impl InMemorySettings {
    /// Number of write calls that reached the repository
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn insert(&self, scope: &str, group: &str, key: &str, value: &str) {
        let now = Utc::now();
        self.rows.lock().unwrap().push(Setting {
            id: Uuid::new_v4(),
            scope: scope.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            description: None,
            group_name: group.to_string(),
            created_at: now,
            updated_at: now,
        });
    }

    pub fn value(&self, scope: &str, key: &str) -> Option<String> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.scope == scope && s.key == key)
            .map(|s| s.value.clone())
    }
}

#[async_trait]
impl SettingRepository for InMemorySettings {
    async fn get_all(&self, scope: &str) -> RepoResult<Vec<Setting>> {
        let mut rows: Vec<Setting> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.scope == scope)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (&a.group_name, &a.key).cmp(&(&b.group_name, &b.key)));
        Ok(rows)
    }

    async fn list_scopes(&self) -> RepoResult<Vec<String>> {
        let mut scopes: Vec<String> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.scope.clone())
            .collect();
        scopes.sort();
        scopes.dedup();
        Ok(scopes)
    }

    async fn get_by_key(&self, scope: &str, key: &str) -> RepoResult<Option<Setting>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.scope == scope && s.key == key)
            .cloned())
    }

    async fn create(&self, scope: &str, input: &SettingInput) -> RepoResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.value(scope, &input.key).is_some() {
            return Err(RepositoryError::Conflict("settings_scope_key".to_string()));
        }
        self.insert(scope, &input.group_name, &input.key, &input.value);
        Ok(())
    }

    async fn update_by_key(&self, scope: &str, key: &str, value: &str) -> RepoResult<Setting> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|s| s.scope == scope && s.key == key)
            .ok_or(RepositoryError::NotFound)?;
        row.value = value.to_string();
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn update_bulk(&self, scope: &str, inputs: &[SettingInput]) -> RepoResult<u64> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        let now = Utc::now();
        for input in inputs {
            match rows
                .iter_mut()
                .find(|s| s.scope == scope && s.key == input.key)
            {
                Some(row) => {
                    row.value = input.value.clone();
                    row.updated_at = now;
                }
                None => rows.push(Setting {
                    id: Uuid::new_v4(),
                    scope: scope.to_string(),
                    key: input.key.clone(),
                    value: input.value.clone(),
                    description: input.description.clone(),
                    group_name: input.group_name.clone(),
                    created_at: now,
                    updated_at: now,
                }),
            }
        }
        Ok(inputs.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryApplications {
    rows: Mutex<Vec<Application>>,
}

impl InMemoryApplications {
    pub fn insert(&self, package_name: &str, key: &str, value: &str) {
        let now = Utc::now();
        self.rows.lock().unwrap().push(Application {
            id: Uuid::new_v4(),
            package_name: package_name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            description: None,
            group_name: "general".to_string(),
            created_at: now,
            updated_at: now,
        });
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryApplications {
    async fn get_all(&self, package_name: &str) -> RepoResult<Vec<Application>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.package_name == package_name)
            .cloned()
            .collect())
    }

    async fn list_package_names(&self) -> RepoResult<Vec<String>> {
        let mut names: Vec<String> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.package_name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn find_package_by_api_key(&self, api_key: &str) -> RepoResult<Option<String>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.key == "api_key" && a.value == api_key)
            .map(|a| a.package_name.clone()))
    }

    async fn upsert_many(&self, inputs: &[ApplicationInput]) -> RepoResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let now = Utc::now();
        for input in inputs {
            match rows
                .iter_mut()
                .find(|a| a.package_name == input.package_name && a.key == input.key)
            {
                Some(row) => {
                    row.value = input.value.clone();
                    row.updated_at = now;
                }
                None => rows.push(Application {
                    id: Uuid::new_v4(),
                    package_name: input.package_name.clone(),
                    key: input.key.clone(),
                    value: input.value.clone(),
                    description: input.description.clone(),
                    group_name: input.group_name.clone(),
                    created_at: now,
                    updated_at: now,
                }),
            }
        }
        Ok(inputs.len() as u64)
    }

    async fn delete_package(&self, package_name: &str) -> RepoResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|a| a.package_name != package_name);
        Ok((before - rows.len()) as u64)
    }
}

// -------------------------------------------------------------------------
// Identity provider
// -------------------------------------------------------------------------

/// Identity provider that knows a fixed set of tokens
#[derive(Default)]
pub struct FakeIdentity {
    tokens: Mutex<HashMap<String, IdentityClaims>>,
    pub verification_emails: AtomicUsize,
    pub password_changes: AtomicUsize,
    pub reset_requests: Mutex<Vec<String>>,
}

impl FakeIdentity {
    pub fn add_token(&self, token: &str, claims: IdentityClaims) {
        self.tokens.lock().unwrap().insert(token.to_string(), claims);
    }
}

/// Claims of a provider account issued a minute ago
pub fn claims(subject: &str, email: &str, verified: bool) -> IdentityClaims {
    IdentityClaims {
        subject: subject.to_string(),
        email: Some(email.to_string()),
        email_verified: verified,
        issued_at: Utc::now().timestamp() - 60,
        ..IdentityClaims::default()
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn verify_id_token(&self, id_token: &str) -> Result<IdentityClaims, IdentityError> {
        self.tokens
            .lock()
            .unwrap()
            .get(id_token)
            .cloned()
            .ok_or_else(|| IdentityError::InvalidToken("unknown token".to_string()))
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        display_name: Option<&str>,
    ) -> Result<SignUp, IdentityError> {
        let mut tokens = self.tokens.lock().unwrap();
        if tokens.values().any(|c| c.email.as_deref() == Some(email)) {
            return Err(IdentityError::EmailExists);
        }

        let subject = format!("uid-{email}");
        let id_token = format!("signup-{email}");
        let mut claims = claims(&subject, email, false);
        claims.name = display_name.map(str::to_string);
        tokens.insert(id_token.clone(), claims);

        Ok(SignUp { subject, id_token })
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), IdentityError> {
        self.reset_requests.lock().unwrap().push(email.to_string());
        if email.starts_with("missing") {
            return Err(IdentityError::EmailNotFound);
        }
        Ok(())
    }

    async fn send_email_verification(&self, id_token: &str) -> Result<(), IdentityError> {
        self.verify_id_token(id_token).await?;
        self.verification_emails.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn change_password(
        &self,
        id_token: &str,
        _new_password: &str,
    ) -> Result<(), IdentityError> {
        self.verify_id_token(id_token).await?;
        self.password_changes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Server
// -------------------------------------------------------------------------

/// Test server instance
pub struct TestServer {
    pub base_url: String,
    pub store: Arc<CountingStore>,
    pub users: Arc<InMemoryUsers>,
    pub settings: Arc<InMemorySettings>,
    pub applications: Arc<InMemoryApplications>,
    pub identity: Arc<FakeIdentity>,
    client: reqwest::Client,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Start a test server with seeded clients and users
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start a test server after adjusting the default test configuration
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = create_test_config();
        configure(&mut config);

        let roles = seeded_roles();
        let store = Arc::new(CountingStore::default());
        let users = Arc::new(InMemoryUsers::new(roles.clone()));
        let settings = Arc::new(InMemorySettings::default());
        let applications = Arc::new(InMemoryApplications::default());
        let identity = Arc::new(FakeIdentity::default());

        seed(&users, &settings, &applications, &identity);

        let state = AppState::from_parts(StateParts {
            config,
            store: store.clone(),
            users: users.clone(),
            roles: Arc::new(InMemoryRoles::new(roles)),
            settings: settings.clone(),
            applications: applications.clone(),
            identity: identity.clone(),
            notifier: AlertNotifier::disabled(),
            db: None,
        });

        let app = create_router(state);
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Failed to read local address");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
        });

        Self {
            base_url: format!("http://{addr}"),
            store,
            users,
            settings,
            applications,
            identity,
            client: reqwest::Client::new(),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get full URL for a path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// GET admitted as the seeded mobile app
    pub fn get(&self, path: &str) -> RequestBuilder {
        mobile(self.client.get(self.url(path)))
    }

    /// POST admitted as the seeded mobile app
    pub fn post(&self, path: &str) -> RequestBuilder {
        mobile(self.client.post(self.url(path)))
    }

    /// PUT admitted as the seeded mobile app
    pub fn put(&self, path: &str) -> RequestBuilder {
        mobile(self.client.put(self.url(path)))
    }

    /// DELETE admitted as the seeded mobile app
    pub fn delete(&self, path: &str) -> RequestBuilder {
        mobile(self.client.delete(self.url(path)))
    }

    /// Fetch a fresh CSRF token
    pub async fn csrf_token(&self) -> String {
        let body: Value = self
            .client
            .get(self.url("/api/token/csrf"))
            .send()
            .await
            .expect("Failed to request CSRF token")
            .json()
            .await
            .expect("Failed to decode CSRF token");
        body["data"]["csrf_token"]
            .as_str()
            .expect("CSRF token missing")
            .to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Add the seeded mobile app's admission headers
pub fn mobile(request: RequestBuilder) -> RequestBuilder {
    request
        .header("X-API-Key", MOBILE_KEY)
        .header("X-Platform", "mobile")
}

/// Add the seeded web client's admission headers
pub fn web(request: RequestBuilder) -> RequestBuilder {
    request
        .header("X-API-Key", WEB_KEY)
        .header("X-Platform", "web")
}

/// Seed one mobile app, one web scope, an admin and a regular user
fn seed(
    users: &InMemoryUsers,
    settings: &InMemorySettings,
    applications: &InMemoryApplications,
    identity: &FakeIdentity,
) {
    applications.insert(PACKAGE, "name", "Video App");
    applications.insert(PACKAGE, "api_key", MOBILE_KEY);
    applications.insert(PACKAGE, "version", "1.0.0");
    applications.insert(PACKAGE, "type", "android");
    applications.insert(PACKAGE, "is_active", "1");

    settings.insert("default", "website", "api_key", WEB_KEY);
    settings.insert("default", "website", "theme", "dark");
    settings.insert("default", "website", "maintenance_mode", "false");
    settings.insert("default", "website", "maintenance_message", "down");
    settings.insert("default", "email", "smtp_password", "hunter2");

    users.insert("admin@example.com", RoleLevel::Admin);
    users.insert("user@example.com", RoleLevel::User);
    identity.add_token(ADMIN_TOKEN, claims("uid-admin", "admin@example.com", true));
    identity.add_token(USER_TOKEN, claims("uid-user", "user@example.com", true));
}

/// Create test configuration
fn create_test_config() -> Config {
    let mut config = Config::default();
    config.server.request_timeout_secs = 30;
    config.rate_limit.enabled = true;
    config.rate_limit.global_max = 1000;
    config.rate_limit.global_window_secs = 60;
    config.telegram.enabled = false;
    config.logging.level = "warn".to_string();
    config
}
