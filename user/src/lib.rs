pub mod auth;
pub mod database;
pub mod error;
pub mod secure_log;

use std::sync::Arc;
use tracing::info;

use auth::rate_limit::SqliteRateLimitStore;
use auth::{AuthConfig, AuthService, LoginRateLimiter, SessionResolver, TokenService};
use database::UserDatabase;

/// Credential store, token service and login service wired together
pub struct UserManager {
    database: Arc<UserDatabase>,
    tokens: Arc<TokenService>,
    auth: AuthService,
}

impl UserManager {
    pub async fn new(
        db_config: database::UserDatabaseConfig,
        auth_config: AuthConfig,
    ) -> error::Result<Self> {
        info!("Initializing user management system");

        let database = Arc::new(UserDatabase::new(db_config).await?);
        let tokens = Arc::new(TokenService::from_config(&auth_config)?);

        // Counters live next to the users so every server process sharing the
        // database shares one limiter
        let limiter = LoginRateLimiter::new(
            Arc::new(SqliteRateLimitStore::new(database.pool().clone())),
            auth_config.rate_limit,
        );

        let auth = AuthService::new(database.clone(), tokens.clone(), limiter, auth_config);

        info!("User management system initialized successfully");
        Ok(Self {
            database,
            tokens,
            auth,
        })
    }

    /// Default store location with configuration from the environment
    pub async fn new_default() -> error::Result<Self> {
        Self::new(database::UserDatabaseConfig::default(), AuthConfig::new()?).await
    }

    pub fn database(&self) -> &UserDatabase {
        &self.database
    }

    pub fn database_handle(&self) -> Arc<UserDatabase> {
        self.database.clone()
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn tokens(&self) -> Arc<TokenService> {
        self.tokens.clone()
    }

    pub fn config(&self) -> &AuthConfig {
        self.auth.config()
    }

    pub fn resolver(&self) -> SessionResolver {
        self.auth.resolver()
    }

    pub async fn verify_integrity(&self) -> error::Result<bool> {
        self.database.verify_integrity().await
    }
}

// Re-export commonly used types
pub use database::UserDatabaseConfig;
pub use error::{Result as UserResult, UserError, LOGIN_FAILED_MESSAGE};
pub use secure_log::{AuditEvent, SecureLogConfig, SecureLogEntry, SecureLogger};

pub use auth::session::{clear_legacy_cookie, clear_session_cookie, session_cookie};
pub use auth::{
    AuthResponse, Identity, LoginRequest, RateLimitPolicy, RegistrationRequest, RequestCookies,
    Resolution, SameSiteConfig, SessionClaims, SessionUser, TokenError,
};

#[cfg(test)]
mod tests {
    use super::*;
    use authz::Role;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_user_manager_creation() {
        let temp_dir = TempDir::new().unwrap();
        let config = UserDatabaseConfig::in_dir(temp_dir.path());
        let auth = AuthConfig::with_secret(b"0123456789abcdef0123456789abcdef".to_vec());

        let manager = UserManager::new(config, auth).await.unwrap();
        assert!(manager.verify_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn test_login_through_sqlite_limiter() {
        let temp_dir = TempDir::new().unwrap();
        let config = UserDatabaseConfig::in_dir(temp_dir.path());
        let auth = AuthConfig::with_secret(b"0123456789abcdef0123456789abcdef".to_vec());
        let manager = UserManager::new(config, auth).await.unwrap();

        manager
            .auth()
            .create_user("admin@demo.test", "Admin", "correctpw", Role::Admin)
            .await
            .unwrap();
        let response = manager
            .auth()
            .login(
                LoginRequest {
                    email: "admin@demo.test".to_string(),
                    password: "correctpw".to_string(),
                },
                "127.0.0.1",
            )
            .await
            .unwrap();

        let cookies = RequestCookies::new().with_cookie("auth-token", response.token);
        let user = manager.resolver().resolve(&cookies).unwrap();
        assert_eq!(user.role, Role::Admin);
    }
}
