//! CEDAR-based authorization engine for the Marain CMS.
//!
//! This crate owns the role hierarchy and evaluates the requirements attached to
//! privileged server actions using the
//! [CEDAR policy language](https://www.cedarpolicy.com/).
//!
//! # Authorization Flow
//!
//! 1. The server action guard resolves the caller's identity from the request
//! 2. The caller becomes a [`Principal`], the operation a [`Requirement`]
//! 3. [`AuthzEngine::authorize`] builds CEDAR entities whose role parents are
//!    taken from [`Role::satisfied_roles`] and evaluates the fixed policy set
//! 4. The guard maps [`Decision::Deny`] to `Forbidden`
//!
//! The policy set never encodes role ordering itself; it only asks whether the
//! principal is `in` the required role group. Ordering lives in the hierarchy
//! table alone.

pub mod error;
pub mod types;

use cedar_policy::{
    Authorizer, Context, Decision as CedarDecision, Entities, EntityId, EntityTypeName,
    EntityUid, PolicySet, Request,
};
use error::{AuthzError, Result};
use serde_json::json;
use std::str::FromStr;
use tracing::debug;

pub use types::{satisfies, Decision, DenyReason, Principal, Requirement, Role};

/// Policies evaluated for every privileged action.
///
/// - one permit per role, matched when the principal belongs to that role group
/// - a forbid for owner-scoped resources that only admins may override
const POLICY_SRC: &str = r#"
    permit(
        principal in Role::"reader",
        action == Action::"reader",
        resource
    );

    permit(
        principal in Role::"author",
        action == Action::"author",
        resource
    );

    permit(
        principal in Role::"admin",
        action == Action::"admin",
        resource
    );

    forbid(principal, action, resource)
    when { resource has owner && resource.owner != principal }
    unless { principal in Role::"admin" };
"#;

/// The authorization engine used by the server action guard.
///
/// # Example
///
/// ```rust
/// use authz::{AuthzEngine, Principal, Requirement, Role};
///
/// let engine = AuthzEngine::new().unwrap();
/// let principal = Principal::new("01HZX", Role::Author);
///
/// let decision = engine
///     .authorize(&principal, &Requirement::role(Role::Author))
///     .unwrap();
/// assert!(decision.is_allowed());
/// ```
pub struct AuthzEngine {
    authorizer: Authorizer,
    policies: PolicySet,
}

impl AuthzEngine {
    /// Parse the built-in policy set once.
    pub fn new() -> Result<Self> {
        let policies =
            PolicySet::from_str(POLICY_SRC).map_err(|e| AuthzError::PolicyParse(e.to_string()))?;

        Ok(Self {
            authorizer: Authorizer::new(),
            policies,
        })
    }

    /// Evaluate `requirement` for `principal`.
    ///
    /// Returns `Ok(Decision::Deny(..))` for a policy denial. `Err` is reserved for
    /// entity or request construction failures, which callers must treat as deny.
    pub fn authorize(&self, principal: &Principal, requirement: &Requirement) -> Result<Decision> {
        let entities = self.build_entities(principal, requirement)?;
        let request = self.build_cedar_request(principal, requirement)?;

        let response = self
            .authorizer
            .is_authorized(&request, &self.policies, &entities);

        let decision = if response.decision() == CedarDecision::Allow {
            Decision::Allow
        } else if !principal.role.satisfies(requirement.role) {
            Decision::Deny(DenyReason::InsufficientRole)
        } else {
            Decision::Deny(DenyReason::NotOwner)
        };

        debug!(
            principal = %principal.id,
            role = %principal.role,
            required = %requirement.role,
            owner = ?requirement.owner_id,
            ?decision,
            "authorization evaluated"
        );

        Ok(decision)
    }

    /// Build the entity store for one request.
    ///
    /// The principal's parents are every role it satisfies according to the
    /// hierarchy table. The resource only carries an `owner` attribute for
    /// owner-scoped requirements.
    fn build_entities(&self, principal: &Principal, requirement: &Requirement) -> Result<Entities> {
        let parents: Vec<_> = principal
            .role
            .satisfied_roles()
            .iter()
            .map(|role| json!({ "type": "Role", "id": role.as_str() }))
            .collect();

        let mut entities = vec![json!({
            "uid": { "type": "User", "id": principal.id },
            "attrs": {},
            "parents": parents
        })];

        for role in Role::ALL {
            entities.push(json!({
                "uid": { "type": "Role", "id": role.as_str() },
                "attrs": {},
                "parents": []
            }));
            entities.push(json!({
                "uid": { "type": "Action", "id": role.as_str() },
                "attrs": {},
                "parents": []
            }));
        }

        let resource_attrs = match &requirement.owner_id {
            Some(owner) => json!({
                "owner": { "__entity": { "type": "User", "id": owner } }
            }),
            None => json!({}),
        };
        entities.push(json!({
            "uid": { "type": "Resource", "id": "target" },
            "attrs": resource_attrs,
            "parents": []
        }));

        Entities::from_json_value(serde_json::Value::Array(entities), None)
            .map_err(|e| AuthzError::EntityCreation(e.to_string()))
    }

    /// Builds a CEDAR request: the action id is the required role's name.
    fn build_cedar_request(&self, principal: &Principal, requirement: &Requirement) -> Result<Request> {
        let principal_uid = EntityUid::from_type_name_and_id(
            EntityTypeName::from_str("User").map_err(|e| {
                AuthzError::EntityCreation(format!("Invalid principal type: {}", e))
            })?,
            EntityId::new(&principal.id),
        );

        let action_uid = EntityUid::from_type_name_and_id(
            EntityTypeName::from_str("Action")
                .map_err(|e| AuthzError::EntityCreation(format!("Invalid action type: {}", e)))?,
            EntityId::new(requirement.role.as_str()),
        );

        let resource_uid = EntityUid::from_type_name_and_id(
            EntityTypeName::from_str("Resource")
                .map_err(|e| AuthzError::EntityCreation(format!("Invalid resource type: {}", e)))?,
            EntityId::new("target"),
        );

        Request::new(
            Some(principal_uid),
            Some(action_uid),
            Some(resource_uid),
            Context::empty(),
            None,
        )
        .map_err(|e| AuthzError::EvaluationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AuthzEngine {
        AuthzEngine::new().expect("built-in policies parse")
    }

    #[test]
    fn test_policy_parsing() {
        assert!(AuthzEngine::new().is_ok());
    }

    /// The engine must agree with the hierarchy table for every role pair.
    #[test]
    fn test_engine_agrees_with_hierarchy() {
        let engine = engine();
        for actual in Role::ALL {
            for required in Role::ALL {
                let principal = Principal::new("user_1", actual);
                let decision = engine
                    .authorize(&principal, &Requirement::role(required))
                    .unwrap();
                assert_eq!(
                    decision.is_allowed(),
                    satisfies(actual, required),
                    "{} requiring {}",
                    actual,
                    required
                );
            }
        }
    }

    #[test]
    fn test_reader_denied_admin_action() {
        let engine = engine();
        let decision = engine
            .authorize(
                &Principal::new("user_1", Role::Reader),
                &Requirement::role(Role::Admin),
            )
            .unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::InsufficientRole));
    }

    #[test]
    fn test_admin_passes_author_gate() {
        let engine = engine();
        let decision = engine
            .authorize(
                &Principal::new("admin_1", Role::Admin),
                &Requirement::role(Role::Author),
            )
            .unwrap();
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn test_owner_allowed_on_own_resource() {
        let engine = engine();
        let decision = engine
            .authorize(
                &Principal::new("author_1", Role::Author),
                &Requirement::owned_by(Role::Author, "author_1"),
            )
            .unwrap();
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn test_non_owner_denied() {
        let engine = engine();
        let decision = engine
            .authorize(
                &Principal::new("author_2", Role::Author),
                &Requirement::owned_by(Role::Author, "author_1"),
            )
            .unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::NotOwner));
    }

    #[test]
    fn test_admin_overrides_ownership() {
        let engine = engine();
        let decision = engine
            .authorize(
                &Principal::new("admin_1", Role::Admin),
                &Requirement::owned_by(Role::Author, "author_1"),
            )
            .unwrap();
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn test_owner_with_insufficient_role_denied() {
        let engine = engine();
        let decision = engine
            .authorize(
                &Principal::new("reader_1", Role::Reader),
                &Requirement::owned_by(Role::Author, "reader_1"),
            )
            .unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::InsufficientRole));
    }

    #[test]
    fn test_repeated_checks_are_idempotent() {
        let engine = engine();
        let principal = Principal::new("user_1", Role::Author);
        let requirement = Requirement::role(Role::Admin);

        let first = engine.authorize(&principal, &requirement).unwrap();
        for _ in 0..10 {
            assert_eq!(engine.authorize(&principal, &requirement).unwrap(), first);
        }
    }
}
