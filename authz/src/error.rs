//! Error types for the authorization system.
//!
//! # Security Note
//! Error messages must not leak policy details to callers. The API layer maps
//! every variant to a generic 403/500 and logs the detail.

use thiserror::Error;

/// Errors that can occur while evaluating authorization requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// The built-in CEDAR policy set failed to parse.
    #[error("Policy parsing failed: {0}")]
    PolicyParse(String),

    /// Failed to create or validate a CEDAR entity.
    #[error("Entity creation failed: {0}")]
    EntityCreation(String),

    /// Failed to build or evaluate an authorization request.
    #[error("Authorization evaluation failed: {0}")]
    EvaluationError(String),

    /// A role name that is not part of the hierarchy.
    #[error("Unknown role: {0}")]
    UnknownRole(String),
}

/// A specialized Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthzError::PolicyParse("invalid syntax".to_string());
        assert_eq!(err.to_string(), "Policy parsing failed: invalid syntax");

        let err = AuthzError::UnknownRole("owner".to_string());
        assert_eq!(err.to_string(), "Unknown role: owner");
    }
}
