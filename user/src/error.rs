use thiserror::Error;

/// Message shown for every failed login, whatever the cause.
pub const LOGIN_FAILED_MESSAGE: &str = "Invalid email or password";

#[derive(Error, Debug)]
pub enum UserError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authorization error: {0}")]
    Authz(#[from] authz::error::AuthzError),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Too many login attempts")]
    RateLimited,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Audit log error: {0}")]
    AuditLog(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Initialization error: {0}")]
    Initialization(String),
}

impl UserError {
    /// Text safe to show to the person at the login form.
    ///
    /// Wrong password, unknown email, inactive account and rate limiting all
    /// read the same so the response does not reveal which one happened.
    pub fn public_message(&self) -> String {
        match self {
            UserError::InvalidCredentials | UserError::RateLimited => {
                LOGIN_FAILED_MESSAGE.to_string()
            }
            UserError::Validation(msg) | UserError::Conflict(msg) => msg.clone(),
            _ => "Internal error".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, UserError>;
