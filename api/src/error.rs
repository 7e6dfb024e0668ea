use authz::{DenyReason, Role};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use user::{UserError, LOGIN_FAILED_MESSAGE};

/// API Error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Wrong password, unknown email, inactive account or rate limited
    #[error("{}", LOGIN_FAILED_MESSAGE)]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Insufficient role: requires {required}, current role is {current}")]
    Forbidden {
        required: Role,
        current: Role,
        reason: DenyReason,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error")]
    InternalError(String),
}

/// Error response structure for OpenAPI documentation
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden { .. } => "FORBIDDEN",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Forbidden {
                required,
                current,
                reason,
            } => Some(json!({
                "required_role": required,
                "current_role": current,
                "reason": reason,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::InternalError(ref cause) = self {
            error!("Internal error: {}", cause);
        }

        let status = self.status_code();
        let error_response = ApiErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Rate limiting is reported exactly like a bad password
impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::InvalidCredentials | UserError::RateLimited => ApiError::InvalidCredentials,
            UserError::UserNotFound(id) => ApiError::NotFound(format!("User {} not found", id)),
            UserError::Validation(msg) => ApiError::ValidationError(msg),
            UserError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<authz::error::AuthzError> for ApiError {
    fn from(err: authz::error::AuthzError) -> Self {
        ApiError::InternalError(format!("Authorization failed: {}", err))
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;
