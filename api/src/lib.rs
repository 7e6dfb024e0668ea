use axum::{
    http::Uri,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod action_guard;
pub mod edge_guard;
pub mod error;
pub mod handlers;
pub mod middleware_hooks;
pub mod models;
pub mod server;


use action_guard::ActionGuard;
use edge_guard::{EdgeGuard, RouteGuardConfig};
use error::{ApiError, ApiResult};
use user::auth::TokenService;

// Re-export server functions for convenience
pub use server::{spawn_server, start_server, start_server_with_config, ApiConfig};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<user::UserManager>,
    pub edge: Arc<EdgeGuard>,
    pub guard: Arc<ActionGuard>,
}

impl AppState {
    /// The edge and action guards each get their own verifier built from the
    /// same configuration.
    pub fn new(users: Arc<user::UserManager>, routes: RouteGuardConfig) -> ApiResult<Self> {
        let config = users.config();

        let edge_tokens = Arc::new(TokenService::from_config(config)?);
        let edge = EdgeGuard::new(edge_tokens, config, routes);

        let mut guard = ActionGuard::new(users.resolver(), authz::AuthzEngine::new()?);
        if config.revalidate_privileged {
            guard = guard.with_revalidation(users.database_handle());
        }

        Ok(Self {
            users,
            edge: Arc::new(edge),
            guard: Arc::new(guard),
        })
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::login,
        handlers::auth::register,
        handlers::auth::logout,
        handlers::auth::get_current_user,
        handlers::users::list_users,
        handlers::users::set_role,
        handlers::users::deactivate_user,
        handlers::users::update_profile,
        handlers::users::author_access,
        handlers::health::health_check,
    ),
    components(
        schemas(
            models::UserResponse,
            models::SessionResponse,
            models::LoginRequestBody,
            models::RegisterRequestBody,
            models::AuthSuccessResponse,
            models::UserListResponse,
            models::SetRoleRequest,
            models::ProfileUpdateRequest,
            models::AccessResponse,
            models::HealthResponse,
            models::DatabaseHealth,
            models::SuccessResponse,
            error::ApiErrorResponse,
            error::ErrorDetail,
        )
    ),
    tags(
        (name = "auth", description = "Login, registration and session"),
        (name = "admin", description = "User administration"),
        (name = "users", description = "Profile and role-gated endpoints"),
        (name = "health", description = "Health check endpoints"),
    ),
    info(
        title = "Marain Auth API",
        version = "1.0.0",
        description = "Session identity and role-based access control for Marain CMS",
        contact(
            name = "Marain CMS Team",
        ),
    ),
)]
pub struct ApiDoc;

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

/// Create the main API router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let api_v1 = Router::new()
        // Session
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::get_current_user))
        // Users
        .route("/users/:id/profile", post(handlers::users::update_profile))
        .route("/author/access", get(handlers::users::author_access))
        // Administration
        .route("/admin/users", get(handlers::users::list_users))
        .route("/admin/users/:id/role", post(handlers::users::set_role))
        .route(
            "/admin/users/:id/deactivate",
            post(handlers::users::deactivate_user),
        )
        // Health check
        .route("/health", get(handlers::health::health_check));

    let routed = Router::new()
        .nest("/api/v1", api_v1)
        .merge(SwaggerUi::new("/api/v1/swagger").url("/api/v1/openapi.json", ApiDoc::openapi()))
        .fallback(not_found)
        .with_state(state.clone());

    // The edge guard wraps the routed service, so it runs before route matching
    let guarded = ServiceBuilder::new()
        .layer(middleware::from_fn_with_state(
            state,
            middleware_hooks::edge_guard_middleware,
        ))
        .service(routed);

    Router::new()
        .fallback_service(guarded)
        .layer(middleware::from_fn(middleware_hooks::request_middleware))
        .layer(middleware::from_fn(middleware_hooks::response_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
