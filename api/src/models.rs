use authz::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use user::{Identity, SessionUser};

/// A user as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[schema(value_type = String, example = "reader")]
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<Identity> for UserResponse {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email,
            display_name: identity.display_name,
            role: identity.role,
            is_active: identity.is_active,
            created_at: identity.created_at,
            last_login_at: identity.last_login_at,
        }
    }
}

/// The identity the server resolved for this request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[schema(value_type = String, example = "author")]
    pub role: Role,
}

impl From<SessionUser> for SessionResponse {
    fn from(user: SessionUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            role: user.role,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequestBody {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequestBody {
    pub email: String,
    pub name: String,
    pub password: String,
    /// Only honored for admins or when self-assigned roles are enabled
    #[schema(value_type = Option<String>, example = "reader")]
    #[serde(default)]
    pub role: Option<Role>,
}

/// Login or registration result. The token is also set as the session cookie.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthSuccessResponse {
    pub user: UserResponse,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetRoleRequest {
    #[schema(value_type = String, example = "author")]
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileUpdateRequest {
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccessResponse {
    pub granted: bool,
    #[schema(value_type = String, example = "author")]
    pub role: Role,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub database: DatabaseHealth,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub message: String,
}

/// Generic success response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}
