//! Credential and session service
//!
//! Implements the account lifecycle:
//! - registration with an Argon2id-hashed password
//! - login against the stored hash
//! - session issue, validation and logout
//! - purging of expired sessions
//!
//! Duplicate usernames and emails are rejected by the storage layer's UNIQUE
//! constraints, never by a lookup before the insert, so two racing
//! registrations cannot both succeed.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::db::repositories::{IdentityField, IdentityRepository, SessionRepository, UniqueViolation};
use crate::models::{Identity, NewIdentity, Session};
use crate::services::password::PasswordHasher;
use crate::services::rate_limiter::LoginRateLimiter;

/// Usernames are path segments, so these would shadow real routes
const RESERVED_USERNAMES: &[&str] = &["login", "register", "logout", "static"];

const MAX_USERNAME_LEN: usize = 50;
const MAX_EMAIL_LEN: usize = 255;

/// Error types for credential and session operations
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Missing or malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Username or email already belongs to another identity
    #[error("Duplicate identity: {0} already registered")]
    DuplicateIdentity(IdentityField),

    /// No identity with the given username
    #[error("Identity not found")]
    IdentityNotFound,

    /// Password did not match
    #[error("Invalid credential")]
    InvalidCredential,

    /// Unknown, expired or orphaned session token
    #[error("Session invalid")]
    SessionInvalid,

    /// Valid session, but for a different identity
    #[error("Access denied")]
    AccessDenied,

    /// Login throttled after repeated failures
    #[error("Too many login attempts")]
    TooManyAttempts,

    /// Storage or hashing failure
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] anyhow::Error),
}

impl AuthError {
    /// Message safe to show to the end user.
    ///
    /// Unknown usernames and wrong passwords read the same, and storage
    /// failures never leak their cause.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Validation(message) => message.clone(),
            AuthError::DuplicateIdentity(IdentityField::Username) => {
                "Username is already taken".to_string()
            }
            AuthError::DuplicateIdentity(IdentityField::Email) => {
                "Email is already registered".to_string()
            }
            AuthError::IdentityNotFound | AuthError::InvalidCredential => {
                "Invalid username or password".to_string()
            }
            AuthError::SessionInvalid => "Please log in".to_string(),
            AuthError::AccessDenied => "Access denied".to_string(),
            AuthError::TooManyAttempts => {
                "Too many failed login attempts. Please try again later.".to_string()
            }
            AuthError::StorageUnavailable(_) => {
                "Service temporarily unavailable. Please try again later.".to_string()
            }
        }
    }
}

/// Input for registration
#[derive(Clone)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterInput {
    /// Create a new registration input
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Input for login
#[derive(Clone)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
}

impl LoginInput {
    /// Create a new login input
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Credential and session service
pub struct AuthService {
    identity_repo: Arc<dyn IdentityRepository>,
    session_repo: Arc<dyn SessionRepository>,
    hasher: PasswordHasher,
    session_ttl: Duration,
    rate_limiter: Option<Arc<LoginRateLimiter>>,
}

impl AuthService {
    /// Create a new service. Sessions live for `session_ttl` after login.
    pub fn new(
        identity_repo: Arc<dyn IdentityRepository>,
        session_repo: Arc<dyn SessionRepository>,
        hasher: PasswordHasher,
        session_ttl: Duration,
    ) -> Self {
        Self {
            identity_repo,
            session_repo,
            hasher,
            session_ttl,
            rate_limiter: None,
        }
    }

    /// Throttle failed logins per username
    pub fn with_rate_limiter(mut self, limiter: Arc<LoginRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// How long a newly issued session lives
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Register a new identity and open a session for it.
    ///
    /// # Errors
    ///
    /// - `Validation` if a field is missing or malformed
    /// - `DuplicateIdentity` if the username or email is taken
    /// - `StorageUnavailable` for database or hashing failures
    pub async fn register(&self, input: RegisterInput) -> Result<(Identity, Session), AuthError> {
        let (username, email) = validate_register_input(&input)?;

        let password_hash = self.hasher.hash_blocking(input.password).await?;

        let identity = self
            .identity_repo
            .create(&NewIdentity::new(username, email, password_hash))
            .await
            .map_err(|err| match err.downcast_ref::<UniqueViolation>() {
                Some(violation) => AuthError::DuplicateIdentity(violation.field),
                None => AuthError::StorageUnavailable(err),
            })?;

        let session = match self.create_session(identity.id).await {
            Ok(session) => session,
            Err(err) => {
                // Without a session the caller is told registration failed,
                // so the identity must not survive either.
                if let Err(e) = self.identity_repo.delete(identity.id).await {
                    tracing::error!(
                        "Failed to roll back identity '{}': {:#}",
                        identity.username,
                        e
                    );
                }
                return Err(err);
            }
        };

        tracing::info!("Registered identity '{}'", identity.username);
        Ok((identity, session))
    }

    /// Verify credentials and open a session.
    ///
    /// An unknown username still costs one password verification so the
    /// response time does not reveal which usernames exist.
    ///
    /// # Errors
    ///
    /// - `Validation` if username or password is empty
    /// - `TooManyAttempts` when the username is throttled
    /// - `IdentityNotFound` / `InvalidCredential` on bad credentials
    /// - `StorageUnavailable` for database or hashing failures
    pub async fn login(&self, input: LoginInput) -> Result<(Identity, Session), AuthError> {
        let username = input.username.trim();
        if username.is_empty() || input.password.is_empty() {
            return Err(AuthError::Validation(
                "Username and password are required".to_string(),
            ));
        }

        // The attempt is counted up front and forgiven on success.
        if let Some(limiter) = &self.rate_limiter {
            if !limiter.try_acquire_attempt(username).await {
                tracing::warn!("Login throttled for '{}'", username);
                return Err(AuthError::TooManyAttempts);
            }
        }

        let Some(identity) = self.identity_repo.get_by_username(username).await? else {
            self.hasher.verify_dummy_blocking(input.password).await?;
            tracing::warn!("Failed login for '{}'", username);
            return Err(AuthError::IdentityNotFound);
        };

        let matches = self
            .hasher
            .verify_blocking(input.password, identity.password_hash.clone())
            .await?;

        if !matches {
            tracing::warn!("Failed login for '{}'", username);
            return Err(AuthError::InvalidCredential);
        }

        if let Some(limiter) = &self.rate_limiter {
            limiter.clear_username_attempts(username).await;
        }

        let session = self.create_session(identity.id).await?;

        tracing::info!("Identity '{}' logged in", identity.username);
        Ok((identity, session))
    }

    /// Resolve a session token to its identity.
    ///
    /// An expired session is rejected even if the sweep has not removed it
    /// yet, and is deleted on the way out.
    pub async fn validate_session(&self, token: &str) -> Result<Identity, AuthError> {
        let session = self
            .session_repo
            .get_by_token(token)
            .await?
            .ok_or(AuthError::SessionInvalid)?;

        if session.is_expired() {
            if let Err(e) = self.session_repo.delete(token).await {
                tracing::warn!("Failed to delete expired session: {:#}", e);
            }
            return Err(AuthError::SessionInvalid);
        }

        self.identity_repo
            .get_by_id(session.identity_id)
            .await?
            .ok_or(AuthError::SessionInvalid)
    }

    /// Gate for `/{username}`: the session must belong to exactly that username.
    pub async fn authorize_profile(
        &self,
        token: Option<&str>,
        username: &str,
    ) -> Result<Identity, AuthError> {
        let token = token.ok_or(AuthError::SessionInvalid)?;
        let identity = self.validate_session(token).await?;

        if identity.username != username {
            return Err(AuthError::AccessDenied);
        }

        Ok(identity)
    }

    /// Destroy a session. Unknown tokens are ignored.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        if self.session_repo.delete(token).await? {
            tracing::debug!("Session closed");
        }
        Ok(())
    }

    /// Delete every expired session, returning how many were removed
    pub async fn sweep_expired_sessions(&self) -> Result<u64, AuthError> {
        let removed = self.session_repo.delete_expired(Utc::now()).await?;
        Ok(removed)
    }

    async fn create_session(&self, identity_id: i64) -> Result<Session, AuthError> {
        let session = Session::new(generate_session_token(), identity_id, self.session_ttl);
        let created = self.session_repo.create(&session).await?;
        Ok(created)
    }
}

/// 64 hex characters drawn from the OS random generator
fn generate_session_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Check registration fields, returning the normalized username and email
fn validate_register_input(input: &RegisterInput) -> Result<(String, String), AuthError> {
    let username = input.username.trim();
    let email = input.email.trim().to_lowercase();

    if username.is_empty() {
        return Err(AuthError::Validation("Username cannot be empty".to_string()));
    }
    if email.is_empty() {
        return Err(AuthError::Validation("Email cannot be empty".to_string()));
    }
    if input.password.is_empty() {
        return Err(AuthError::Validation("Password cannot be empty".to_string()));
    }

    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AuthError::Validation(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AuthError::Validation(
            "Username may only contain letters, digits, '_', '-' and '.'".to_string(),
        ));
    }
    if RESERVED_USERNAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(username))
    {
        return Err(AuthError::Validation("Username is not available".to_string()));
    }

    if email.chars().count() > MAX_EMAIL_LEN {
        return Err(AuthError::Validation(format!(
            "Email must be at most {} characters",
            MAX_EMAIL_LEN
        )));
    }
    if !email.contains('@') {
        return Err(AuthError::Validation("Invalid email format".to_string()));
    }

    Ok((username.to_string(), email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoginLimitConfig, PasswordConfig};
    use crate::db::repositories::{SqlxIdentityRepository, SqlxSessionRepository};
    use crate::db::{create_test_pool, migrations, DynDatabasePool};

    pub(super) fn cheap_hasher() -> PasswordHasher {
        PasswordHasher::new(&PasswordConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .expect("Failed to build hasher")
    }

    pub(super) async fn setup_test_service() -> (DynDatabasePool, AuthService) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let service = AuthService::new(
            SqlxIdentityRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
            cheap_hasher(),
            Duration::minutes(60),
        );

        (pool, service)
    }

    async fn register_alice(service: &AuthService) -> (Identity, Session) {
        service
            .register(RegisterInput::new("alice", "a@x.com", "pw123"))
            .await
            .expect("Failed to register")
    }

    // ========================================================================
    // Registration tests
    // ========================================================================

    #[tokio::test]
    async fn test_register_then_duplicate_then_login() {
        let (_pool, service) = setup_test_service().await;

        let (alice, session) = register_alice(&service).await;
        assert_eq!(alice.username, "alice");
        assert_eq!(session.identity_id, alice.id);

        let dup = service
            .register(RegisterInput::new("alice", "other@x.com", "pw456"))
            .await;
        assert!(matches!(
            dup,
            Err(AuthError::DuplicateIdentity(IdentityField::Username))
        ));

        let wrong = service.login(LoginInput::new("alice", "wrong")).await;
        assert!(matches!(wrong, Err(AuthError::InvalidCredential)));

        let (identity, _) = service
            .login(LoginInput::new("alice", "pw123"))
            .await
            .expect("Login should succeed");
        assert_eq!(identity.id, alice.id);
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let (_pool, service) = setup_test_service().await;
        register_alice(&service).await;

        let result = service
            .register(RegisterInput::new("bob", "A@X.com", "pw"))
            .await;

        assert!(matches!(
            result,
            Err(AuthError::DuplicateIdentity(IdentityField::Email))
        ));
    }

    #[tokio::test]
    async fn test_register_normalizes_fields() {
        let (_pool, service) = setup_test_service().await;

        let (identity, _) = service
            .register(RegisterInput::new("  bob  ", " Bob@Example.COM ", " pw "))
            .await
            .unwrap();

        assert_eq!(identity.username, "bob");
        assert_eq!(identity.email, "bob@example.com");
        // The password is taken as typed, spaces included
        assert!(service.login(LoginInput::new("bob", " pw ")).await.is_ok());
        assert!(service.login(LoginInput::new("bob", "pw")).await.is_err());
    }

    #[tokio::test]
    async fn test_register_stores_hash_not_password() {
        let (_pool, service) = setup_test_service().await;

        let (identity, _) = register_alice(&service).await;

        assert_ne!(identity.password_hash, "pw123");
        assert!(identity.password_hash.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (_pool, service) = setup_test_service().await;

        let cases = [
            RegisterInput::new("", "a@x.com", "pw"),
            RegisterInput::new("   ", "a@x.com", "pw"),
            RegisterInput::new("alice", "", "pw"),
            RegisterInput::new("alice", "a@x.com", ""),
            RegisterInput::new("alice", "not-an-email", "pw"),
            RegisterInput::new("al ice", "a@x.com", "pw"),
            RegisterInput::new("alice/x", "a@x.com", "pw"),
            RegisterInput::new("Login", "a@x.com", "pw"),
            RegisterInput::new("static", "a@x.com", "pw"),
            RegisterInput::new("a".repeat(51), "a@x.com", "pw"),
            RegisterInput::new("alice", format!("{}@x.com", "e".repeat(255)), "pw"),
        ];

        for input in cases {
            let result = service.register(input).await;
            assert!(matches!(result, Err(AuthError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_session_token_shape() {
        let (_pool, service) = setup_test_service().await;

        let (_, session) = register_alice(&service).await;

        assert_eq!(session.token.len(), 64);
        assert!(session.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            session.expires_at - session.created_at,
            Duration::minutes(60)
        );
    }

    // ========================================================================
    // Login tests
    // ========================================================================

    #[tokio::test]
    async fn test_login_unknown_user() {
        let (_pool, service) = setup_test_service().await;

        let result = service.login(LoginInput::new("ghost", "pw")).await;

        assert!(matches!(result, Err(AuthError::IdentityNotFound)));
    }

    #[tokio::test]
    async fn test_login_is_case_sensitive() {
        let (_pool, service) = setup_test_service().await;
        register_alice(&service).await;

        let result = service.login(LoginInput::new("Alice", "pw123")).await;

        assert!(matches!(result, Err(AuthError::IdentityNotFound)));
    }

    #[tokio::test]
    async fn test_login_requires_fields() {
        let (_pool, service) = setup_test_service().await;

        assert!(matches!(
            service.login(LoginInput::new("", "pw")).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            service.login(LoginInput::new("alice", "")).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_each_login_issues_new_session() {
        let (_pool, service) = setup_test_service().await;
        register_alice(&service).await;

        let (_, first) = service.login(LoginInput::new("alice", "pw123")).await.unwrap();
        let (_, second) = service.login(LoginInput::new("alice", "pw123")).await.unwrap();

        assert_ne!(first.token, second.token);
        assert!(service.validate_session(&first.token).await.is_ok());
        assert!(service.validate_session(&second.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_rate_limited() {
        let (_pool, service) = setup_test_service().await;
        let limiter = Arc::new(LoginRateLimiter::new(&LoginLimitConfig {
            max_attempts: 2,
            window_minutes: 15,
        }));
        let service = service.with_rate_limiter(limiter.clone());
        register_alice(&service).await;

        for _ in 0..2 {
            assert!(matches!(
                service.login(LoginInput::new("alice", "wrong")).await,
                Err(AuthError::InvalidCredential)
            ));
        }

        // Even the right password is refused while throttled
        assert!(matches!(
            service.login(LoginInput::new("alice", "pw123")).await,
            Err(AuthError::TooManyAttempts)
        ));

        limiter.clear_username_attempts("alice").await;
        assert!(service.login(LoginInput::new("alice", "pw123")).await.is_ok());
    }

    #[tokio::test]
    async fn test_successful_login_clears_failures() {
        let (_pool, service) = setup_test_service().await;
        let limiter = Arc::new(LoginRateLimiter::new(&LoginLimitConfig {
            max_attempts: 2,
            window_minutes: 15,
        }));
        let service = service.with_rate_limiter(limiter.clone());
        register_alice(&service).await;

        service.login(LoginInput::new("alice", "wrong")).await.unwrap_err();
        service.login(LoginInput::new("alice", "pw123")).await.unwrap();

        assert!(!limiter.is_username_limited("alice").await);
    }

    #[tokio::test]
    async fn test_throttle_is_per_exact_username() {
        let (_pool, service) = setup_test_service().await;
        let limiter = Arc::new(LoginRateLimiter::new(&LoginLimitConfig {
            max_attempts: 5,
            window_minutes: 15,
        }));
        let service = service.with_rate_limiter(limiter);
        register_alice(&service).await;

        for _ in 0..5 {
            assert!(matches!(
                service.login(LoginInput::new("ALICE", "x")).await,
                Err(AuthError::IdentityNotFound)
            ));
        }
        assert!(matches!(
            service.login(LoginInput::new("ALICE", "x")).await,
            Err(AuthError::TooManyAttempts)
        ));

        assert!(service.login(LoginInput::new("alice", "pw123")).await.is_ok());
    }

    #[tokio::test]
    async fn test_parallel_failed_logins_respect_limit() {
        let (_pool, service) = setup_test_service().await;
        let limiter = Arc::new(LoginRateLimiter::new(&LoginLimitConfig {
            max_attempts: 3,
            window_minutes: 15,
        }));
        let service = Arc::new(service.with_rate_limiter(limiter));
        register_alice(&service).await;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.login(LoginInput::new("alice", "wrong")).await })
            })
            .collect();

        let mut checked = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Err(AuthError::InvalidCredential) => checked += 1,
                Err(AuthError::TooManyAttempts) => {}
                other => panic!("Unexpected outcome: {:?}", other.map(|_| ())),
            }
        }

        assert_eq!(checked, 3);
    }

    // ========================================================================
    // Registration rollback
    // ========================================================================

    struct UnavailableSessions;

    #[async_trait::async_trait]
    impl SessionRepository for UnavailableSessions {
        async fn create(&self, _session: &Session) -> anyhow::Result<Session> {
            Err(anyhow::anyhow!("down"))
        }

        async fn get_by_token(&self, _token: &str) -> anyhow::Result<Option<Session>> {
            Ok(None)
        }

        async fn delete(&self, _token: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn delete_by_identity(&self, _identity_id: i64) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn delete_expired(&self, _now: chrono::DateTime<Utc>) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_register_rolls_back_identity_when_session_fails() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let identities = SqlxIdentityRepository::boxed(pool.clone());
        let failing = AuthService::new(
            identities.clone(),
            Arc::new(UnavailableSessions),
            cheap_hasher(),
            Duration::minutes(60),
        );

        let result = failing
            .register(RegisterInput::new("alice", "a@x.com", "pw123"))
            .await;

        assert!(matches!(result, Err(AuthError::StorageUnavailable(_))));
        assert_eq!(identities.count().await.unwrap(), 0);

        // Once storage recovers the same registration goes through
        let healthy = AuthService::new(
            identities.clone(),
            SqlxSessionRepository::boxed(pool.clone()),
            cheap_hasher(),
            Duration::minutes(60),
        );
        assert!(healthy
            .register(RegisterInput::new("alice", "a@x.com", "pw123"))
            .await
            .is_ok());
        assert_eq!(identities.count().await.unwrap(), 1);
    }

    // ========================================================================
    // Session tests
    // ========================================================================

    #[tokio::test]
    async fn test_validate_session() {
        let (_pool, service) = setup_test_service().await;
        let (alice, session) = register_alice(&service).await;

        let identity = service.validate_session(&session.token).await.unwrap();

        assert_eq!(identity.id, alice.id);
        assert!(matches!(
            service.validate_session("nonexistent").await,
            Err(AuthError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn test_expired_session_rejected_before_sweep() {
        let (pool, service) = setup_test_service().await;
        let (alice, _) = register_alice(&service).await;

        let session_repo = SqlxSessionRepository::new(pool.clone());
        let expired = Session::new(generate_session_token(), alice.id, Duration::minutes(-5));
        session_repo.create(&expired).await.unwrap();

        let result = service.validate_session(&expired.token).await;

        assert!(matches!(result, Err(AuthError::SessionInvalid)));
        // Validation removed the row on the way out
        assert!(session_repo.get_by_token(&expired.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_authorize_profile() {
        let (_pool, service) = setup_test_service().await;
        let (_, alice_session) = register_alice(&service).await;
        service
            .register(RegisterInput::new("bob", "b@x.com", "pw"))
            .await
            .unwrap();

        let identity = service
            .authorize_profile(Some(&alice_session.token), "alice")
            .await
            .unwrap();
        assert_eq!(identity.username, "alice");

        assert!(matches!(
            service.authorize_profile(Some(&alice_session.token), "bob").await,
            Err(AuthError::AccessDenied)
        ));
        assert!(matches!(
            service.authorize_profile(Some(&alice_session.token), "Alice").await,
            Err(AuthError::AccessDenied)
        ));
        assert!(matches!(
            service.authorize_profile(None, "alice").await,
            Err(AuthError::SessionInvalid)
        ));
        assert!(matches!(
            service.authorize_profile(Some("bogus"), "alice").await,
            Err(AuthError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn test_logout() {
        let (_pool, service) = setup_test_service().await;
        let (_, session) = register_alice(&service).await;

        service.logout(&session.token).await.unwrap();

        assert!(matches!(
            service.validate_session(&session.token).await,
            Err(AuthError::SessionInvalid)
        ));
        // Second logout is a no-op
        service.logout(&session.token).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_expired_sessions() {
        let (pool, service) = setup_test_service().await;
        let (alice, live) = register_alice(&service).await;

        let session_repo = SqlxSessionRepository::new(pool.clone());
        for _ in 0..3 {
            let expired = Session::new(generate_session_token(), alice.id, Duration::hours(-1));
            session_repo.create(&expired).await.unwrap();
        }

        assert_eq!(service.sweep_expired_sessions().await.unwrap(), 3);
        assert_eq!(service.sweep_expired_sessions().await.unwrap(), 0);
        assert!(service.validate_session(&live.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_storage_failure_fails_closed() {
        let (pool, service) = setup_test_service().await;
        let (_, session) = register_alice(&service).await;
        pool.close().await;

        assert!(matches!(
            service.validate_session(&session.token).await,
            Err(AuthError::StorageUnavailable(_))
        ));
        assert!(matches!(
            service.login(LoginInput::new("alice", "pw123")).await,
            Err(AuthError::StorageUnavailable(_))
        ));
        assert!(matches!(
            service.register(RegisterInput::new("bob", "b@x.com", "pw")).await,
            Err(AuthError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_user_messages_do_not_distinguish_bad_credentials() {
        assert_eq!(
            AuthError::IdentityNotFound.user_message(),
            AuthError::InvalidCredential.user_message()
        );
        assert_eq!(
            AuthError::DuplicateIdentity(IdentityField::Username).user_message(),
            "Username is already taken"
        );
        assert_eq!(
            AuthError::DuplicateIdentity(IdentityField::Email).user_message(),
            "Email is already registered"
        );

        let storage = AuthError::StorageUnavailable(anyhow::anyhow!("disk on fire"));
        assert!(!storage.user_message().contains("disk"));
    }
}

#[cfg(test)]
mod property_tests {
    use super::tests::setup_test_service;
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// Login with the registered secret succeeds, and the issued token
        /// resolves back to the same identity.
        #[test]
        fn registered_credentials_round_trip(
            username in "[a-zA-Z0-9_]{1,20}",
            email_prefix in "[a-z]{3,10}",
            password in "[a-zA-Z0-9!@#$%^&*]{1,20}"
        ) {
            prop_assume!(!RESERVED_USERNAMES.iter().any(|r| r.eq_ignore_ascii_case(&username)));

            let rt = tokio::runtime::Runtime::new().unwrap();
            let result: Result<(), TestCaseError> = rt.block_on(async {
                let (_pool, service) = setup_test_service().await;
                let email = format!("{}@example.com", email_prefix);

                let (registered, _) = service
                    .register(RegisterInput::new(username.clone(), email, password.clone()))
                    .await
                    .expect("Registration should succeed");

                let (_, session) = service
                    .login(LoginInput::new(username.clone(), password.clone()))
                    .await
                    .expect("Login should succeed with valid credentials");

                let validated = service
                    .validate_session(&session.token)
                    .await
                    .expect("Session should be valid");

                prop_assert_eq!(validated.id, registered.id);
                prop_assert_eq!(validated.username, registered.username);
                Ok(())
            });
            result?;
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// Any secret other than the registered one is rejected.
        #[test]
        fn wrong_secret_rejected(
            correct in "[a-zA-Z0-9]{1,20}",
            wrong in "[a-zA-Z0-9]{1,20}"
        ) {
            prop_assume!(correct != wrong);

            let rt = tokio::runtime::Runtime::new().unwrap();
            let result: Result<(), TestCaseError> = rt.block_on(async {
                let (_pool, service) = setup_test_service().await;
                service
                    .register(RegisterInput::new("alice", "a@x.com", correct.clone()))
                    .await
                    .expect("Registration should succeed");

                let outcome = service.login(LoginInput::new("alice", wrong.clone())).await;

                prop_assert!(matches!(outcome, Err(AuthError::InvalidCredential)));
                Ok(())
            });
            result?;
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// However many times a username is registered, one identity exists.
        #[test]
        fn duplicate_username_never_creates_second_identity(
            attempts in 2usize..6
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let result: Result<(), TestCaseError> = rt.block_on(async {
                let (pool, service) = setup_test_service().await;

                let mut created = 0;
                for i in 0..attempts {
                    let input = RegisterInput::new("alice", format!("a{}@x.com", i), "pw");
                    match service.register(input).await {
                        Ok(_) => created += 1,
                        Err(AuthError::DuplicateIdentity(IdentityField::Username)) => {}
                        Err(other) => panic!("Unexpected error: {:?}", other),
                    }
                }

                let repo = crate::db::repositories::SqlxIdentityRepository::new(pool.clone());
                prop_assert_eq!(created, 1);
                prop_assert_eq!(repo.count().await.unwrap(), 1);
                Ok(())
            });
            result?;
        }
    }
}
