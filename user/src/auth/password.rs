//! Argon2id password hashing.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use once_cell::sync::Lazy;
use rand::RngCore;
use tracing::error;

use crate::error::{Result, UserError};

/// Hash verified against when the email is unknown, so that path costs the
/// same as a wrong password.
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password("dummy-password-for-timing").ok());

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| UserError::PasswordHash(e.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| UserError::PasswordHash(e.to_string()))
}

/// Check a password against a stored PHC string. A malformed stored hash is
/// logged and treated as a mismatch.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let parsed = match PasswordHash::new(stored) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("Stored password hash is malformed: {}", e);
            return false;
        }
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Burn one verification against the dummy hash.
pub fn verify_dummy(password: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_is_a_mismatch() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_dummy_verification_does_not_panic() {
        verify_dummy("whatever");
    }
}
