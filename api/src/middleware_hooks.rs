use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::time::Instant;
use tracing::{debug, info};

use user::RequestCookies;

use crate::{edge_guard::EdgeDecision, AppState};

/// Edge route guard middleware
///
/// Runs before routing on every request. Only the token is consulted; no
/// identity is handed to handlers, which resolve it again themselves.
pub async fn edge_guard_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let cookies = RequestCookies::from_headers(request.headers());

    match state.edge.decide(&path, &cookies) {
        EdgeDecision::Pass => next.run(request).await,
        EdgeDecision::Redirect(to) => {
            info!("EDGE GUARD: {} {} redirected to {}", request.method(), path, to);
            Redirect::temporary(&to).into_response()
        }
    }
}

/// Request processing middleware hook
pub async fn request_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    debug!("REQUEST MIDDLEWARE: {} {}", method, uri);

    let response = next.run(request).await;

    debug!(
        "REQUEST MIDDLEWARE: {} {} -> {} in {:?}",
        method,
        uri,
        response.status(),
        start.elapsed()
    );
    response
}

/// Response processing middleware hook
pub async fn response_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(
        "X-Marain-Version",
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    headers.insert("X-Marain-Processed", HeaderValue::from_static("true"));

    response
}
