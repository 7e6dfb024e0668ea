//! Authentication for Marain CMS
//!
//! - Signed session tokens ([`token`])
//! - Session resolution from request cookies ([`session`])
//! - Login attempt rate limiting ([`rate_limit`])
//! - Password login and registration ([`AuthService`])

pub mod config;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod token;
pub mod types;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use authz::Role;

pub use config::{AuthConfig, SameSiteConfig};
pub use rate_limit::{LoginRateLimiter, RateLimitDecision, RateLimitPolicy};
pub use session::{RequestCookies, Resolution, SessionResolver};
pub use token::{SessionClaims, TokenError, TokenService};
pub use types::{AuthResponse, Identity, LoginRequest, RegistrationRequest, SessionUser};

use crate::{
    database::{NewUser, UserDatabase},
    error::{Result, UserError},
    secure_log::{AuditEvent, AuditRecord, SecureLogger},
};
use types::{is_plausible_email, normalize_email, MIN_PASSWORD_LEN};

/// Password login, registration and account administration.
#[derive(Clone)]
pub struct AuthService {
    db: Arc<UserDatabase>,
    tokens: Arc<TokenService>,
    limiter: LoginRateLimiter,
    config: AuthConfig,
    secure_logger: Arc<SecureLogger>,
}

impl AuthService {
    pub fn new(
        db: Arc<UserDatabase>,
        tokens: Arc<TokenService>,
        limiter: LoginRateLimiter,
        config: AuthConfig,
    ) -> Self {
        let secure_logger = db.logger();
        Self {
            db,
            tokens,
            limiter,
            config,
            secure_logger,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn tokens(&self) -> Arc<TokenService> {
        self.tokens.clone()
    }

    /// A resolver sharing this service's token secret.
    pub fn resolver(&self) -> SessionResolver {
        SessionResolver::new(self.tokens.clone(), &self.config)
    }

    /// Authenticate with email and password.
    ///
    /// The rate limiter runs before the credential lookup and counts every
    /// attempt, successful or not.
    pub async fn login(&self, request: LoginRequest, origin: &str) -> Result<AuthResponse> {
        let email = normalize_email(&request.email);
        if email.is_empty() || request.password.is_empty() {
            return Err(UserError::Validation(
                "Email and password are required".to_string(),
            ));
        }

        if !self.limiter.check_and_record(&email, origin).await?.is_allowed() {
            warn!("Login rate limited for {} from {}", email, origin);
            self.audit(
                AuditEvent::LoginRateLimited,
                AuditRecord::new().subject(&email).origin(origin),
                false,
            )
            .await;
            return Err(UserError::RateLimited);
        }

        let stored = match self.db.find_by_email(&email).await? {
            Some(stored) => stored,
            None => {
                password::verify_dummy(&request.password);
                return self.reject_login(&email, origin, "unknown_email").await;
            }
        };

        if !password::verify_password(&request.password, &stored.password_hash) {
            return self.reject_login(&email, origin, "wrong_password").await;
        }
        if !stored.identity.is_active {
            return self.reject_login(&email, origin, "inactive").await;
        }

        let identity = self.db.record_login(&stored.identity.id, Utc::now()).await?;
        let token = self.tokens.issue(&SessionUser::from(&identity))?;

        info!("User {} logged in with role {}", identity.id, identity.role);
        self.audit(
            AuditEvent::LoginSucceeded,
            AuditRecord::new()
                .actor(&identity.id)
                .subject(&email)
                .origin(origin),
            true,
        )
        .await;

        Ok(AuthResponse {
            user: identity,
            token,
        })
    }

    async fn reject_login(&self, email: &str, origin: &str, reason: &str) -> Result<AuthResponse> {
        debug!("Login rejected for {}: {}", email, reason);
        self.audit(
            AuditEvent::LoginFailed,
            AuditRecord::new()
                .subject(email)
                .origin(origin)
                .details(json!({ "reason": reason })),
            false,
        )
        .await;
        Err(UserError::InvalidCredentials)
    }

    /// Register a new account and issue a token for it.
    ///
    /// A requested role above `reader` is granted only when `acting` is an
    /// admin or self-assigned roles are enabled. `acting` must come from a
    /// verified token, see [`SessionResolver::resolve_token`].
    pub async fn register(
        &self,
        request: RegistrationRequest,
        acting: Option<&SessionUser>,
    ) -> Result<AuthResponse> {
        let requested = request.role.unwrap_or(Role::Reader);
        let acting_admin = acting.is_some_and(|user| user.role == Role::Admin);

        let role = if requested == Role::Reader
            || acting_admin
            || self.config.allow_self_assigned_roles
        {
            requested
        } else {
            warn!(
                "Ignoring requested role {} for self-registration of {}",
                requested,
                normalize_email(&request.email)
            );
            Role::Reader
        };

        let identity = self
            .create_user(&request.email, &request.name, &request.password, role)
            .await?;
        let token = self.tokens.issue(&SessionUser::from(&identity))?;

        let mut record = AuditRecord::new()
            .subject(&identity.email)
            .details(json!({ "role": role, "requested_role": requested }));
        if let Some(actor) = acting {
            record = record.actor(&actor.id);
        }
        self.audit(AuditEvent::UserRegistered, record, true).await;

        Ok(AuthResponse {
            user: identity,
            token,
        })
    }

    /// Validate and store a user with an explicit role. Trusted callers only.
    pub async fn create_user(
        &self,
        email: &str,
        name: &str,
        password: &str,
        role: Role,
    ) -> Result<Identity> {
        let email = normalize_email(email);
        if !is_plausible_email(&email) {
            return Err(UserError::Validation("Invalid email address".to_string()));
        }
        if name.trim().is_empty() {
            return Err(UserError::Validation("Name is required".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(UserError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let password_hash = password::hash_password(password)?;
        let identity = self
            .db
            .create_user(NewUser {
                email,
                display_name: name.to_string(),
                password_hash,
                role,
            })
            .await?;

        info!("Created user {} with role {}", identity.id, identity.role);
        Ok(identity)
    }

    /// Change a stored role. The user's current token keeps its old role until
    /// it expires or they log in again.
    pub async fn set_role(&self, actor: &SessionUser, id: &str, role: Role) -> Result<Identity> {
        let before = self
            .db
            .find_by_id(id)
            .await?
            .ok_or_else(|| UserError::UserNotFound(id.to_string()))?;
        let identity = self.db.set_role(id, role).await?;

        self.audit(
            AuditEvent::RoleChanged,
            AuditRecord::new()
                .actor(&actor.id)
                .subject(&identity.id)
                .details(json!({ "from": before.role, "to": role })),
            true,
        )
        .await;
        Ok(identity)
    }

    /// Activate or deactivate an account. Deactivation blocks future logins;
    /// already issued tokens stay valid until they expire.
    pub async fn set_active(
        &self,
        actor: &SessionUser,
        id: &str,
        is_active: bool,
    ) -> Result<Identity> {
        let identity = self.db.set_active(id, is_active).await?;
        let event = if is_active {
            AuditEvent::UserReactivated
        } else {
            AuditEvent::UserDeactivated
        };
        self.audit(
            event,
            AuditRecord::new().actor(&actor.id).subject(&identity.id),
            true,
        )
        .await;
        Ok(identity)
    }

    /// Update a display name.
    pub async fn update_display_name(&self, id: &str, display_name: &str) -> Result<Identity> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(UserError::Validation("Name is required".to_string()));
        }
        self.db.set_display_name(id, display_name).await
    }

    /// Audit failures are logged, never surfaced to the caller.
    async fn audit(&self, event: AuditEvent, record: AuditRecord, success: bool) {
        if let Err(e) = self.secure_logger.log_event(event, record, success).await {
            warn!("Failed to write audit entry {}: {}", event.as_str(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::UserDatabaseConfig;
    use tempfile::TempDir;

    async fn service(dir: &TempDir, config: AuthConfig) -> AuthService {
        let db = Arc::new(
            UserDatabase::new(UserDatabaseConfig::in_dir(dir.path()))
                .await
                .unwrap(),
        );
        let tokens = Arc::new(TokenService::from_config(&config).unwrap());
        let limiter = LoginRateLimiter::in_memory(config.rate_limit);
        AuthService::new(db, tokens, limiter, config)
    }

    fn config() -> AuthConfig {
        AuthConfig::with_secret(b"0123456789abcdef0123456789abcdef".to_vec())
    }

    fn login(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn registration(email: &str, role: Option<Role>) -> RegistrationRequest {
        RegistrationRequest {
            email: email.to_string(),
            name: "New User".to_string(),
            password: "longenough".to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn test_admin_login_issues_admin_token() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, config()).await;
        service
            .create_user("admin@demo.test", "Admin", "correctpw", Role::Admin)
            .await
            .unwrap();

        let response = service
            .login(login("admin@demo.test", "correctpw"), "127.0.0.1")
            .await
            .unwrap();

        let claims = service.tokens().verify(&response.token).unwrap();
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.sub, response.user.id);
        assert!(response.user.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, config()).await;
        let user = service
            .create_user("reader@demo.test", "Reader", "correctpw", Role::Reader)
            .await
            .unwrap();

        let wrong = service
            .login(login("reader@demo.test", "wrongpass"), "o1")
            .await
            .unwrap_err();
        let unknown = service
            .login(login("ghost@demo.test", "correctpw"), "o1")
            .await
            .unwrap_err();

        let actor = SessionUser::from(&user);
        service.set_active(&actor, &user.id, false).await.unwrap();
        let inactive = service
            .login(login("reader@demo.test", "correctpw"), "o2")
            .await
            .unwrap_err();

        for err in [wrong, unknown, inactive] {
            assert!(matches!(err, UserError::InvalidCredentials));
            assert_eq!(err.public_message(), "Invalid email or password");
        }
    }

    #[tokio::test]
    async fn test_sixth_attempt_is_rate_limited_even_with_correct_password() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, config()).await;
        service
            .create_user("admin@demo.test", "Admin", "correctpw", Role::Admin)
            .await
            .unwrap();

        for _ in 0..5 {
            let err = service
                .login(login("admin@demo.test", "wrong-password"), "10.0.0.1")
                .await
                .unwrap_err();
            assert!(matches!(err, UserError::InvalidCredentials));
        }

        let err = service
            .login(login("admin@demo.test", "correctpw"), "10.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::RateLimited));
        assert_eq!(err.public_message(), "Invalid email or password");

        // Another origin has its own counter
        assert!(service
            .login(login("admin@demo.test", "correctpw"), "10.0.0.2")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_self_registration_cannot_escalate() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, config()).await;

        let response = service
            .register(registration("sneaky@demo.test", Some(Role::Admin)), None)
            .await
            .unwrap();
        assert_eq!(response.user.role, Role::Reader);
        assert_eq!(
            service.tokens().verify(&response.token).unwrap().role,
            Role::Reader
        );
    }

    #[tokio::test]
    async fn test_admin_may_assign_roles() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, config()).await;
        let admin = service
            .create_user("admin@demo.test", "Admin", "correctpw", Role::Admin)
            .await
            .unwrap();

        let response = service
            .register(
                registration("writer@demo.test", Some(Role::Author)),
                Some(&SessionUser::from(&admin)),
            )
            .await
            .unwrap();
        assert_eq!(response.user.role, Role::Author);
    }

    #[tokio::test]
    async fn test_self_assigned_roles_when_enabled() {
        let dir = TempDir::new().unwrap();
        let mut config = config();
        config.allow_self_assigned_roles = true;
        let service = service(&dir, config).await;

        let response = service
            .register(registration("writer@demo.test", Some(Role::Author)), None)
            .await
            .unwrap();
        assert_eq!(response.user.role, Role::Author);
    }

    #[tokio::test]
    async fn test_registration_validation() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, config()).await;

        let mut short = registration("short@demo.test", None);
        short.password = "1234567".to_string();
        assert!(matches!(
            service.register(short, None).await,
            Err(UserError::Validation(_))
        ));

        assert!(matches!(
            service.register(registration("not-an-email", None), None).await,
            Err(UserError::Validation(_))
        ));

        let mut nameless = registration("nameless@demo.test", None);
        nameless.name = "   ".to_string();
        assert!(matches!(
            service.register(nameless, None).await,
            Err(UserError::Validation(_))
        ));

        service
            .register(registration("taken@demo.test", None), None)
            .await
            .unwrap();
        assert!(matches!(
            service.register(registration("Taken@demo.test", None), None).await,
            Err(UserError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_role_change_does_not_touch_existing_tokens() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, config()).await;
        let admin = service
            .create_user("admin@demo.test", "Admin", "correctpw", Role::Admin)
            .await
            .unwrap();
        let reader = service
            .register(registration("reader@demo.test", None), None)
            .await
            .unwrap();

        let updated = service
            .set_role(&SessionUser::from(&admin), &reader.user.id, Role::Author)
            .await
            .unwrap();
        assert_eq!(updated.role, Role::Author);

        // The token issued before the change still carries the old role
        let claims = service.tokens().verify(&reader.token).unwrap();
        assert_eq!(claims.role, Role::Reader);
    }

    #[tokio::test]
    async fn test_audit_trail_is_written() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, config()).await;
        service
            .create_user("admin@demo.test", "Admin", "correctpw", Role::Admin)
            .await
            .unwrap();
        service
            .login(login("admin@demo.test", "correctpw"), "o")
            .await
            .unwrap();
        let _ = service.login(login("admin@demo.test", "nope-nope"), "o").await;

        let entries = service.secure_logger.read_entries().unwrap();
        let events: Vec<_> = entries.iter().map(|e| e.event).collect();
        assert!(events.contains(&AuditEvent::LoginSucceeded));
        assert!(events.contains(&AuditEvent::LoginFailed));
        assert!(service.secure_logger.verify_log_chain().await.unwrap());

        let raw = std::fs::read_to_string(service.secure_logger.path()).unwrap();
        assert!(!raw.contains("correctpw"));
    }
}
