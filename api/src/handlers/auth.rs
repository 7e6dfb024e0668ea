//! Login, registration, logout and current-session handlers

use std::net::SocketAddr;

use authz::Role;
use axum::{
    extract::{ConnectInfo, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    response::{AppendHeaders, IntoResponse, Json},
};
use tracing::{debug, info};

use user::auth::{LoginRequest, RegistrationRequest};
use user::{clear_legacy_cookie, clear_session_cookie, session_cookie, RequestCookies};

use crate::{
    error::{ApiError, ApiResult},
    models::{
        AuthSuccessResponse, LoginRequestBody, RegisterRequestBody, SessionResponse,
        SuccessResponse,
    },
    AppState,
};

/// Rate-limit origin of a request: the peer address when known.
fn client_origin(connect_info: Option<ConnectInfo<SocketAddr>>) -> String {
    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn cookie_header(
    value: Result<HeaderValue, axum::http::header::InvalidHeaderValue>,
) -> ApiResult<HeaderValue> {
    value.map_err(|e| ApiError::InternalError(format!("Invalid cookie header: {}", e)))
}

/// Log in with email and password
///
/// POST /api/v1/auth/login
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequestBody,
    responses(
        (status = 200, description = "Logged in, session cookie set", body = AuthSuccessResponse),
        (status = 401, description = "Invalid email or password", body = crate::error::ApiErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<LoginRequestBody>,
) -> ApiResult<impl IntoResponse> {
    let origin = client_origin(connect_info);
    debug!("Login attempt from {}", origin);

    let response = state
        .users
        .auth()
        .login(
            LoginRequest {
                email: body.email,
                password: body.password,
            },
            &origin,
        )
        .await?;

    let cookie = cookie_header(session_cookie(state.users.config(), &response.token))?;
    info!("Login succeeded for {}", response.user.id);

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(AuthSuccessResponse {
            user: response.user.into(),
            token: response.token,
        }),
    ))
}

/// Register a new account
///
/// POST /api/v1/auth/register
///
/// Self-registration always yields `reader` unless self-assigned roles are
/// enabled. The acting identity comes from a signed token only, so a legacy
/// cookie never unlocks a role. When an admin registers someone else, the
/// admin's own session cookie is left alone.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequestBody,
    responses(
        (status = 200, description = "Account created", body = AuthSuccessResponse),
        (status = 400, description = "Validation failed", body = crate::error::ApiErrorResponse),
        (status = 409, description = "Email already registered", body = crate::error::ApiErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequestBody>,
) -> ApiResult<impl IntoResponse> {
    let acting = state
        .users
        .resolver()
        .resolve_token(&RequestCookies::from_headers(&headers));

    let response = state
        .users
        .auth()
        .register(
            RegistrationRequest {
                email: body.email,
                name: body.name,
                password: body.password,
                role: body.role,
            },
            acting.as_ref(),
        )
        .await?;

    let mut response_headers = HeaderMap::new();
    if acting.is_none() {
        response_headers.insert(
            SET_COOKIE,
            cookie_header(session_cookie(state.users.config(), &response.token))?,
        );
    }

    Ok((
        response_headers,
        Json(AuthSuccessResponse {
            user: response.user.into(),
            token: response.token,
        }),
    ))
}

/// Clear the session and legacy cookies
///
/// POST /api/v1/auth/logout
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses(
        (status = 200, description = "Logged out", body = SuccessResponse)
    ),
    tag = "auth"
)]
pub async fn logout(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let config = state.users.config();
    let session = cookie_header(clear_session_cookie(config))?;
    let legacy = cookie_header(clear_legacy_cookie(config))?;

    Ok((
        AppendHeaders([(SET_COOKIE, session), (SET_COOKIE, legacy)]),
        Json(SuccessResponse {
            success: true,
            message: "Logged out successfully".to_string(),
        }),
    ))
}

/// Current session
///
/// GET /api/v1/auth/me
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Resolved identity", body = SessionResponse),
        (status = 401, description = "No session", body = crate::error::ApiErrorResponse)
    ),
    tag = "auth"
)]
pub async fn get_current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionResponse>> {
    let user = state.guard.require_role(&headers, Role::Reader).await?;
    Ok(Json(user.into()))
}
