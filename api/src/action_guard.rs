//! Server action guard.
//!
//! Every privileged handler calls [`ActionGuard::authorize`] itself and must
//! handle the `Err`. The guard re-resolves identity from the request's cookies
//! and never relies on anything the edge guard decided.

use std::sync::Arc;

use authz::{AuthzEngine, Decision, DenyReason, Requirement, Role};
use axum::http::HeaderMap;
use tracing::{debug, warn};

use user::auth::{RequestCookies, SessionResolver, SessionUser};
use user::database::UserDatabase;

use crate::error::{ApiError, ApiResult};

pub struct ActionGuard {
    resolver: SessionResolver,
    engine: AuthzEngine,
    /// Present when privileged actions re-read the credential store
    revalidate: Option<Arc<UserDatabase>>,
}

impl ActionGuard {
    pub fn new(resolver: SessionResolver, engine: AuthzEngine) -> Self {
        Self {
            resolver,
            engine,
            revalidate: None,
        }
    }

    /// Replace token claims with the stored role and reject inactive or
    /// deleted users.
    pub fn with_revalidation(mut self, db: Arc<UserDatabase>) -> Self {
        self.revalidate = Some(db);
        self
    }

    /// Resolve the caller and check `requirement`.
    ///
    /// - no identity: `Unauthorized`
    /// - role below the requirement, or not the owner of an owner-scoped
    ///   resource: `Forbidden` with the required and current role
    pub async fn authorize(
        &self,
        headers: &HeaderMap,
        requirement: Requirement,
    ) -> ApiResult<SessionUser> {
        let cookies = RequestCookies::from_headers(headers);
        let mut user = self.resolver.resolve(&cookies).ok_or_else(|| {
            debug!("Action guard: no session for {:?} requirement", requirement.role);
            ApiError::Unauthorized
        })?;

        if let Some(db) = &self.revalidate {
            match db.find_by_id(&user.id).await? {
                Some(stored) if stored.is_active => user.role = stored.role,
                _ => {
                    warn!("Action guard: session for {} no longer valid in store", user.id);
                    return Err(ApiError::Unauthorized);
                }
            }
        }

        match self.engine.authorize(&user.principal(), &requirement)? {
            Decision::Allow => Ok(user),
            Decision::Deny(reason) => {
                warn!(
                    "Action guard: denied {} (role {}) for {} requirement: {:?}",
                    user.id, user.role, requirement.role, reason
                );
                Err(ApiError::Forbidden {
                    required: forbidden_role(&requirement, reason),
                    current: user.role,
                    reason,
                })
            }
        }
    }

    pub async fn require_role(&self, headers: &HeaderMap, role: Role) -> ApiResult<SessionUser> {
        self.authorize(headers, Requirement::role(role)).await
    }
}

/// Role that would have been enough. An owner mismatch is only overridden by
/// `admin`.
fn forbidden_role(requirement: &Requirement, reason: DenyReason) -> Role {
    match reason {
        DenyReason::InsufficientRole => requirement.role,
        DenyReason::NotOwner => Role::Admin,
    }
}
