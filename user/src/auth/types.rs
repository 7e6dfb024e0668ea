//! Identity and request/response types shared by the auth flows.

use authz::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LEN: usize = 8;

/// A user as stored in the credential store, minus credential secrets.
///
/// The stored copy is authoritative. Tokens issued from it are snapshots and do
/// not follow later role or `is_active` changes until re-issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// The identity a request resolves to: the subset carried by a session token
/// or a legacy cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
}

impl SessionUser {
    /// Evaluate the role hierarchy for this session.
    pub fn satisfies(&self, required: Role) -> bool {
        self.role.satisfies(required)
    }

    pub fn principal(&self) -> authz::Principal {
        authz::Principal::new(self.id.clone(), self.role)
    }
}

impl From<&Identity> for SessionUser {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
            role: identity.role,
        }
    }
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Registration request. `role` is a request, not a grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Successful login or registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: Identity,
    /// The raw signed token, also set as the session cookie
    pub token: String,
}

/// Normalize an email for storage and rate-limit keys.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal shape check: one `@`, non-empty local part and a dotted domain.
pub fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
