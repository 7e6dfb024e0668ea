use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, Pool, Sqlite,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use authz::Role;

use crate::auth::types::{normalize_email, Identity};
use crate::error::{Result, UserError};
use crate::secure_log::{AuditEvent, AuditRecord, SecureLogConfig, SecureLogger};

pub const USERS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'reader' CHECK (role IN ('reader', 'author', 'admin')),
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        last_login_at TEXT
    )
"#;

/// Rate limiter counters, one row per `(email, origin)`. Timestamps are unix
/// milliseconds.
pub const LOGIN_ATTEMPTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS login_attempts (
        email TEXT NOT NULL,
        origin TEXT NOT NULL,
        attempt_count INTEGER NOT NULL,
        window_start INTEGER NOT NULL,
        last_attempt INTEGER NOT NULL,
        PRIMARY KEY (email, origin)
    )
"#;

/// Configuration for the credential store
#[derive(Debug, Clone)]
pub struct UserDatabaseConfig {
    /// Path to the database file
    pub database_path: PathBuf,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
    pub secure_log_config: SecureLogConfig,
}

impl Default for UserDatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/auth/marain_auth.db"),
            max_connections: 5,
            connection_timeout: 30,
            secure_log_config: SecureLogConfig::default(),
        }
    }
}

impl UserDatabaseConfig {
    /// Database and audit log side by side under `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            database_path: dir.join("marain_auth.db"),
            secure_log_config: SecureLogConfig {
                log_path: dir.join("audit.log"),
                ..SecureLogConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Fields needed to create a user. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: Role,
}

/// A stored user together with its password hash.
#[derive(Debug, Clone)]
pub struct StoredUser {
    pub identity: Identity,
    pub password_hash: String,
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    display_name: String,
    password_hash: String,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for StoredUser {
    type Error = UserError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Self {
            identity: Identity {
                id: row.id,
                email: row.email,
                display_name: row.display_name,
                role: row.role.parse()?,
                is_active: row.is_active,
                created_at: row.created_at,
                last_login_at: row.last_login_at,
            },
            password_hash: row.password_hash,
        })
    }
}

const SELECT_USER: &str = "SELECT id, email, display_name, password_hash, role, is_active, \
                           created_at, last_login_at FROM users";

/// Credential store
pub struct UserDatabase {
    pool: Pool<Sqlite>,
    secure_logger: Arc<SecureLogger>,
}

impl UserDatabase {
    /// Open (creating if needed) the credential store and its audit log
    pub async fn new(config: UserDatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(
            "Opening credential store at: {}",
            config.database_path.display()
        );
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&config.database_path)
                    .create_if_missing(true),
            )
            .await
            .map_err(|e| UserError::Initialization(format!("Failed to open database: {}", e)))?;

        let secure_logger = Arc::new(SecureLogger::new(config.secure_log_config.clone())?);

        let db = Self {
            pool,
            secure_logger,
        };
        db.run_migrations().await?;

        db.secure_logger
            .log_event(AuditEvent::StoreInitialized, AuditRecord::new(), true)
            .await?;

        info!("Credential store initialized successfully");
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        info!("Running credential store migrations");

        sqlx::query(USERS_TABLE).execute(&self.pool).await?;
        sqlx::query(LOGIN_ATTEMPTS_TABLE).execute(&self.pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)")
            .execute(&self.pool)
            .await?;

        info!("Credential store migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn logger(&self) -> Arc<SecureLogger> {
        self.secure_logger.clone()
    }

    /// Insert a user. A duplicate email is a `Conflict`.
    pub async fn create_user(&self, new_user: NewUser) -> Result<Identity> {
        let identity = Identity {
            id: ulid::Ulid::new().to_string(),
            email: normalize_email(&new_user.email),
            display_name: new_user.display_name.trim().to_string(),
            role: new_user.role,
            is_active: true,
            created_at: Utc::now(),
            last_login_at: None,
        };

        let result = sqlx::query(
            "INSERT INTO users (id, email, display_name, password_hash, role, is_active, created_at) \
             VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&identity.id)
        .bind(&identity.email)
        .bind(&identity.display_name)
        .bind(&new_user.password_hash)
        .bind(identity.role.as_str())
        .bind(identity.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Created user {} with role {}", identity.id, identity.role);
                Ok(identity)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(UserError::Conflict(
                "An account with this email already exists".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<StoredUser>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{} WHERE email = ?", SELECT_USER))
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        row.map(StoredUser::try_from).transpose()
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Identity>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{} WHERE id = ?", SELECT_USER))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(StoredUser::try_from)
            .transpose()?
            .map(|stored| stored.identity))
    }

    /// All users, oldest first
    pub async fn list_users(&self) -> Result<Vec<Identity>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!("{} ORDER BY created_at, id", SELECT_USER))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| StoredUser::try_from(row).map(|stored| stored.identity))
            .collect()
    }

    /// Change a user's stored role. Outstanding tokens keep the old role.
    pub async fn set_role(&self, id: &str, role: Role) -> Result<Identity> {
        let updated = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.updated_identity(id, updated.rows_affected()).await
    }

    /// Activate or deactivate a user. Outstanding tokens stay valid.
    pub async fn set_active(&self, id: &str, is_active: bool) -> Result<Identity> {
        let updated = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.updated_identity(id, updated.rows_affected()).await
    }

    pub async fn set_display_name(&self, id: &str, display_name: &str) -> Result<Identity> {
        let updated = sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.updated_identity(id, updated.rows_affected()).await
    }

    /// Stamp `last_login_at`.
    pub async fn record_login(&self, id: &str, at: DateTime<Utc>) -> Result<Identity> {
        let updated = sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.updated_identity(id, updated.rows_affected()).await
    }

    async fn updated_identity(&self, id: &str, rows_affected: u64) -> Result<Identity> {
        if rows_affected == 0 {
            return Err(UserError::UserNotFound(id.to_string()));
        }
        self.find_by_id(id)
            .await?
            .ok_or_else(|| UserError::UserNotFound(id.to_string()))
    }

    /// Check required tables and the audit chain
    pub async fn verify_integrity(&self) -> Result<bool> {
        for table in ["users", "login_attempts"] {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(&self.pool)
            .await?;

            if !exists {
                warn!("Missing table: {}", table);
                return Ok(false);
            }
        }

        if !self.secure_logger.verify_log_chain().await? {
            warn!("Audit log chain verification failed");
            return Ok(false);
        }

        info!("Credential store integrity check passed");
        Ok(true)
    }

    pub async fn close(self) -> Result<()> {
        self.pool.close().await;
        info!("Credential store connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> UserDatabase {
        UserDatabase::new(UserDatabaseConfig::in_dir(dir.path()))
            .await
            .unwrap()
    }

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.to_string(),
            display_name: "Test User".to_string(),
            password_hash: "$argon2id$placeholder".to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn test_database_initialization() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;

        assert!(dir.path().join("marain_auth.db").exists());
        assert!(db.verify_integrity().await.unwrap());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;

        let created = db
            .create_user(new_user(" Author@Demo.Test ", Role::Author))
            .await
            .unwrap();
        assert_eq!(created.email, "author@demo.test");
        assert!(created.is_active);
        assert!(created.last_login_at.is_none());

        let stored = db.find_by_email("AUTHOR@demo.test").await.unwrap().unwrap();
        assert_eq!(stored.identity, created);
        assert_eq!(stored.password_hash, "$argon2id$placeholder");

        let by_id = db.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(by_id.role, Role::Author);

        assert!(db.find_by_email("nobody@demo.test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_conflict() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;

        db.create_user(new_user("dup@demo.test", Role::Reader))
            .await
            .unwrap();
        let err = db
            .create_user(new_user("DUP@demo.test", Role::Admin))
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_role_and_active_updates() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        let user = db
            .create_user(new_user("r@demo.test", Role::Reader))
            .await
            .unwrap();

        let promoted = db.set_role(&user.id, Role::Admin).await.unwrap();
        assert_eq!(promoted.role, Role::Admin);

        let deactivated = db.set_active(&user.id, false).await.unwrap();
        assert!(!deactivated.is_active);

        let now = Utc::now();
        let logged_in = db.record_login(&user.id, now).await.unwrap();
        assert_eq!(
            logged_in.last_login_at.map(|t| t.timestamp()),
            Some(now.timestamp())
        );

        assert!(matches!(
            db.set_role("missing", Role::Admin).await,
            Err(UserError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_role_check_constraint() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;

        let result = sqlx::query(
            "INSERT INTO users (id, email, display_name, password_hash, role, created_at) \
             VALUES ('x', 'x@demo.test', 'X', 'h', 'superuser', '2026-01-01T00:00:00Z')",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_users() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        for (email, role) in [
            ("a@demo.test", Role::Admin),
            ("b@demo.test", Role::Author),
            ("c@demo.test", Role::Reader),
        ] {
            db.create_user(new_user(email, role)).await.unwrap();
        }

        let users = db.list_users().await.unwrap();
        assert_eq!(users.len(), 3);
    }
}
