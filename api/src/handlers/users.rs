//! User administration and profile handlers.
//!
//! Each handler asks the action guard first, before touching the store.

use authz::{Requirement, Role};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    models::{AccessResponse, ProfileUpdateRequest, SetRoleRequest, UserListResponse, UserResponse},
    AppState,
};

/// List all users
///
/// GET /api/v1/admin/users
#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    responses(
        (status = 200, description = "All users", body = UserListResponse),
        (status = 401, description = "No session", body = crate::error::ApiErrorResponse),
        (status = 403, description = "Not an admin", body = crate::error::ApiErrorResponse)
    ),
    tag = "admin"
)]
pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<UserListResponse>> {
    state.guard.require_role(&headers, Role::Admin).await?;

    let users: Vec<UserResponse> = state
        .users
        .database()
        .list_users()
        .await?
        .into_iter()
        .map(UserResponse::from)
        .collect();

    Ok(Json(UserListResponse {
        total: users.len(),
        users,
    }))
}

/// Change a user's role
///
/// POST /api/v1/admin/users/{id}/role
///
/// The user's existing token keeps its old role until it is re-issued.
#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/role",
    params(("id" = String, Path, description = "User id")),
    request_body = SetRoleRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 403, description = "Not an admin", body = crate::error::ApiErrorResponse),
        (status = 404, description = "No such user", body = crate::error::ApiErrorResponse)
    ),
    tag = "admin"
)]
pub async fn set_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<SetRoleRequest>,
) -> ApiResult<Json<UserResponse>> {
    let actor = state.guard.require_role(&headers, Role::Admin).await?;

    if actor.id == id && body.role != Role::Admin {
        return Err(ApiError::BadRequest(
            "Admins cannot demote themselves".to_string(),
        ));
    }

    let identity = state.users.auth().set_role(&actor, &id, body.role).await?;
    info!("{} set role of {} to {}", actor.id, id, body.role);
    Ok(Json(identity.into()))
}

/// Deactivate a user
///
/// POST /api/v1/admin/users/{id}/deactivate
///
/// Blocks future logins. Tokens already issued stay valid until expiry.
#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/deactivate",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Deactivated user", body = UserResponse),
        (status = 403, description = "Not an admin", body = crate::error::ApiErrorResponse),
        (status = 404, description = "No such user", body = crate::error::ApiErrorResponse)
    ),
    tag = "admin"
)]
pub async fn deactivate_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<UserResponse>> {
    let actor = state.guard.require_role(&headers, Role::Admin).await?;

    if actor.id == id {
        return Err(ApiError::BadRequest(
            "Admins cannot deactivate themselves".to_string(),
        ));
    }

    let identity = state.users.auth().set_active(&actor, &id, false).await?;
    info!("{} deactivated {}", actor.id, id);
    Ok(Json(identity.into()))
}

/// Edit a profile. Owner or admin only.
///
/// POST /api/v1/users/{id}/profile
#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/profile",
    params(("id" = String, Path, description = "User id")),
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 401, description = "No session", body = crate::error::ApiErrorResponse),
        (status = 403, description = "Not the owner", body = crate::error::ApiErrorResponse)
    ),
    tag = "users"
)]
pub async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ProfileUpdateRequest>,
) -> ApiResult<Json<UserResponse>> {
    state
        .guard
        .authorize(&headers, Requirement::owned_by(Role::Reader, id.clone()))
        .await?;

    let identity = state
        .users
        .auth()
        .update_display_name(&id, &body.display_name)
        .await?;
    Ok(Json(identity.into()))
}

/// Author area access check
///
/// GET /api/v1/author/access
#[utoipa::path(
    get,
    path = "/api/v1/author/access",
    responses(
        (status = 200, description = "Caller may use author features", body = AccessResponse),
        (status = 403, description = "Role below author", body = crate::error::ApiErrorResponse)
    ),
    tag = "users"
)]
pub async fn author_access(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<AccessResponse>> {
    let user = state.guard.require_role(&headers, Role::Author).await?;
    Ok(Json(AccessResponse {
        granted: true,
        role: user.role,
    }))
}
