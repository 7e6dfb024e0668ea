use crate::{create_router, edge_guard::RouteGuardConfig, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Path classes for the edge guard
    pub routes: RouteGuardConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
            routes: RouteGuardConfig::default(),
        }
    }
}

impl ApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_routes(mut self, routes: RouteGuardConfig) -> Self {
        self.routes = routes;
        self
    }
}

/// Start the API server with the given configuration
pub async fn start_server_with_config(
    users: Arc<user::UserManager>,
    config: ApiConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = AppState::new(users, config.routes)?;
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("API server listening on {}", addr);
    info!(
        "Swagger UI available at http://localhost:{}/api/v1/swagger",
        config.port
    );

    // Peer addresses key the login rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Start the API server with default configuration
pub async fn start_server(
    users: Arc<user::UserManager>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    start_server_with_config(users, ApiConfig::default()).await
}

/// Start the API server in a background task
pub fn spawn_server(users: Arc<user::UserManager>, config: ApiConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = start_server_with_config(users, config).await {
            tracing::error!("API server error: {}", e);
        }
    })
}
