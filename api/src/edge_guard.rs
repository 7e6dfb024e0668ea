//! Edge route guard.
//!
//! Runs on every request before routing, using nothing but the request's
//! session token. It never touches the credential store and never returns an
//! error: absence or insufficiency becomes a redirect.
//!
//! This module shares no state with [`crate::action_guard`]. Both verify the
//! token on their own.

use std::sync::Arc;

use authz::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use user::auth::{AuthConfig, RequestCookies, TokenService};

/// Path classes and redirect targets for the edge guard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteGuardConfig {
    /// Paths that are public when matched exactly
    pub public_exact: Vec<String>,
    /// Path prefixes that are public
    pub public_prefixes: Vec<String>,
    /// Prefixes that require `admin`
    pub admin_prefixes: Vec<String>,
    /// Prefixes that require `author`
    pub author_prefixes: Vec<String>,
    /// Where a request without a valid token is sent
    pub login_redirect: String,
    /// Where a request with an insufficient role is sent
    pub forbidden_redirect: String,
}

impl Default for RouteGuardConfig {
    fn default() -> Self {
        Self {
            public_exact: [
                "/",
                "/auth",
                "/api/v1/health",
                "/api/v1/auth/login",
                "/api/v1/auth/register",
                "/api/v1/auth/logout",
                "/api/v1/openapi.json",
            ]
            .map(String::from)
            .to_vec(),
            public_prefixes: ["/api/v1/swagger", "/articles", "/static"]
                .map(String::from)
                .to_vec(),
            admin_prefixes: ["/api/v1/admin", "/admin"].map(String::from).to_vec(),
            author_prefixes: ["/api/v1/author", "/author"].map(String::from).to_vec(),
            login_redirect: "/auth".to_string(),
            forbidden_redirect: "/".to_string(),
        }
    }
}

/// How the edge treats a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    Public,
    /// Any valid token
    Authenticated,
    RequiresRole(Role),
}

impl RouteGuardConfig {
    pub fn classify(&self, path: &str) -> PathClass {
        if self.public_exact.iter().any(|p| p == path)
            || self.public_prefixes.iter().any(|p| prefix_matches(p, path))
        {
            return PathClass::Public;
        }
        if self.admin_prefixes.iter().any(|p| prefix_matches(p, path)) {
            return PathClass::RequiresRole(Role::Admin);
        }
        if self.author_prefixes.iter().any(|p| prefix_matches(p, path)) {
            return PathClass::RequiresRole(Role::Author);
        }
        PathClass::Authenticated
    }
}

/// `/admin` matches `/admin` and `/admin/users`, not `/administrator`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeDecision {
    Pass,
    Redirect(String),
}

/// Stateless gatekeeper holding its own copy of the token verifier
#[derive(Debug, Clone)]
pub struct EdgeGuard {
    tokens: Arc<TokenService>,
    cookie_name: String,
    routes: RouteGuardConfig,
}

impl EdgeGuard {
    pub fn new(tokens: Arc<TokenService>, auth: &AuthConfig, routes: RouteGuardConfig) -> Self {
        Self {
            tokens,
            cookie_name: auth.cookie_name.clone(),
            routes,
        }
    }

    pub fn routes(&self) -> &RouteGuardConfig {
        &self.routes
    }

    pub fn decide(&self, path: &str, cookies: &RequestCookies) -> EdgeDecision {
        self.decide_at(path, cookies, Utc::now())
    }

    /// Decision table:
    ///
    /// | path class     | valid token                         | no/invalid token |
    /// |----------------|-------------------------------------|------------------|
    /// | public         | pass                                | pass             |
    /// | requires role  | pass if role satisfies, else `/`    | `/auth`          |
    /// | other          | pass                                | `/auth`          |
    pub fn decide_at(&self, path: &str, cookies: &RequestCookies, now: DateTime<Utc>) -> EdgeDecision {
        let class = self.routes.classify(path);
        if class == PathClass::Public {
            return EdgeDecision::Pass;
        }

        // The legacy cookie is not read here. A stale cookie token falls
        // through to the bearer token.
        let mut candidates = cookies.tokens(&self.cookie_name).peekable();
        if candidates.peek().is_none() {
            debug!("Edge: no token on {}", path);
            return EdgeDecision::Redirect(self.routes.login_redirect.clone());
        }
        let verified = candidates.find_map(|token| match self.tokens.verify_at(token, now) {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!("Edge: invalid token on {}: {}", path, e);
                None
            }
        });
        let Some(claims) = verified else {
            return EdgeDecision::Redirect(self.routes.login_redirect.clone());
        };

        match class {
            PathClass::RequiresRole(required) if !claims.role.satisfies(required) => {
                debug!(
                    "Edge: role {} does not satisfy {} on {}",
                    claims.role, required, path
                );
                EdgeDecision::Redirect(self.routes.forbidden_redirect.clone())
            }
            _ => EdgeDecision::Pass,
        }
    }
}
