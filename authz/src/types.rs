//! Core authorization types: roles, principals and requirements.
//!
//! # Role hierarchy
//!
//! The hierarchy table in [`Role::satisfied_roles`] is the only place where role
//! ordering is defined. Every enforcement point (edge guard, action guard,
//! client cache, CEDAR entity parents) derives its answer from it. Call sites
//! must not compare roles inline.
//!
//! ```text
//! admin  ⊇ author ⊇ reader
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;

/// A user's role. Every identity carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Author,
    Admin,
}

impl Role {
    /// All roles, lowest first.
    pub const ALL: [Role; 3] = [Role::Reader, Role::Author, Role::Admin];

    /// The hierarchy table: every role a holder of `self` satisfies, itself included.
    ///
    /// `admin` is listed as satisfying `author` here rather than special-cased at
    /// author-gated call sites.
    pub fn satisfied_roles(self) -> &'static [Role] {
        match self {
            Role::Reader => &[Role::Reader],
            Role::Author => &[Role::Author, Role::Reader],
            Role::Admin => &[Role::Admin, Role::Author, Role::Reader],
        }
    }

    /// Whether a holder of `self` meets a `required` role.
    pub fn satisfies(self, required: Role) -> bool {
        self.satisfied_roles().contains(&required)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Author => "author",
            Role::Admin => "admin",
        }
    }
}

/// Free-function form of [`Role::satisfies`], the call external collaborators depend on.
pub fn satisfies(actual: Role, required: Role) -> bool {
    actual.satisfies(required)
}

impl Default for Role {
    fn default() -> Self {
        Role::Reader
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reader" => Ok(Role::Reader),
            "author" => Ok(Role::Author),
            "admin" => Ok(Role::Admin),
            other => Err(AuthzError::UnknownRole(other.to_string())),
        }
    }
}

/// The subject of an authorization request.
///
/// # Security Note
/// Principals must be built from a server-side resolved identity, never from
/// client-supplied role claims.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// User id (ULID)
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// What a privileged operation demands from its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Minimum role, evaluated through the hierarchy
    pub role: Role,
    /// Owner of the targeted resource for owner-scoped operations.
    /// When set, the caller must be the owner or an admin.
    pub owner_id: Option<String>,
}

impl Requirement {
    /// A role-only requirement.
    pub fn role(role: Role) -> Self {
        Self {
            role,
            owner_id: None,
        }
    }

    /// A requirement scoped to a resource owned by `owner_id`.
    pub fn owned_by(role: Role, owner_id: impl Into<String>) -> Self {
        Self {
            role,
            owner_id: Some(owner_id.into()),
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    InsufficientRole,
    NotOwner,
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Role::Admin, Role::Admin, true)]
    #[case(Role::Admin, Role::Author, true)]
    #[case(Role::Admin, Role::Reader, true)]
    #[case(Role::Author, Role::Admin, false)]
    #[case(Role::Author, Role::Author, true)]
    #[case(Role::Author, Role::Reader, true)]
    #[case(Role::Reader, Role::Admin, false)]
    #[case(Role::Reader, Role::Author, false)]
    #[case(Role::Reader, Role::Reader, true)]
    fn test_hierarchy_table(#[case] actual: Role, #[case] required: Role, #[case] expected: bool) {
        assert_eq!(satisfies(actual, required), expected);
    }

    #[test]
    fn test_admin_satisfies_everything() {
        for required in Role::ALL {
            assert!(Role::Admin.satisfies(required));
        }
    }

    #[test]
    fn test_satisfies_is_reflexive() {
        for role in Role::ALL {
            assert!(role.satisfies(role));
        }
    }

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" Author ".parse::<Role>().unwrap(), Role::Author);
        assert_eq!(Role::Reader.to_string(), "reader");
        assert!(matches!(
            "owner".parse::<Role>(),
            Err(AuthzError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_role_serde_lowercase() {
        let json = serde_json::to_string(&Role::Author).unwrap();
        assert_eq!(json, "\"author\"");
        let role: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[test]
    fn test_requirement_helpers() {
        let req = Requirement::role(Role::Author);
        assert!(req.owner_id.is_none());

        let req = Requirement::owned_by(Role::Reader, "user_1");
        assert_eq!(req.owner_id.as_deref(), Some("user_1"));
        assert_eq!(req.role, Role::Reader);
    }
}
