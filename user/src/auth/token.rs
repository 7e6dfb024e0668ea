//! Signed, self-contained session tokens.
//!
//! Format: `base64url(claims json) "." base64url(HMAC-SHA256(first segment))`.
//!
//! A token that verifies was issued by this server with the current secret and
//! has not expired. It says nothing about whether the subject still exists or
//! is still active; privileged flows that need that must ask the credential
//! store.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use authz::Role;

use super::config::{AuthConfig, MAX_TOKEN_TTL_SECONDS, MIN_SECRET_LEN};
use super::types::SessionUser;
use crate::error::{Result, UserError};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: user id
    pub sub: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    /// Issued-at, unix seconds
    pub iat: i64,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Unique token id; two tokens are never byte-identical
    pub jti: String,
}

impl SessionClaims {
    pub fn user(&self) -> SessionUser {
        SessionUser {
            id: self.sub.clone(),
            email: self.email.clone(),
            display_name: self.name.clone(),
            role: self.role,
        }
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Why a token was rejected. Every variant means "invalid"; the split exists
/// for logs only.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

/// Issues and verifies session tokens with a server-held secret.
#[derive(Clone)]
pub struct TokenService {
    key: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &[u8], ttl_seconds: i64) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(UserError::Configuration(format!(
                "token secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        if !(1..=MAX_TOKEN_TTL_SECONDS).contains(&ttl_seconds) {
            return Err(UserError::Configuration(format!(
                "token ttl must be between 1 and {} seconds",
                MAX_TOKEN_TTL_SECONDS
            )));
        }
        Ok(Self {
            key: secret.to_vec(),
            ttl: Duration::seconds(ttl_seconds),
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::new(&config.secret_key, config.token_ttl_seconds)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `user` valid from now for the configured TTL.
    pub fn issue(&self, user: &SessionUser) -> Result<String> {
        self.issue_at(user, Utc::now())
    }

    pub fn issue_at(&self, user: &SessionUser, now: DateTime<Utc>) -> Result<String> {
        let iat = now.timestamp();
        let exp = iat
            .checked_add(self.ttl.num_seconds())
            .ok_or_else(|| UserError::Configuration("token expiry out of range".to_string()))?;
        let claims = SessionClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            name: user.display_name.clone(),
            role: user.role,
            iat,
            exp,
            jti: ulid::Ulid::new().to_string(),
        };

        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(payload.as_bytes())?);
        Ok(format!("{}.{}", payload, signature))
    }

    /// Verify signature and expiry at the current time.
    pub fn verify(&self, token: &str) -> std::result::Result<SessionClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify at an explicit instant. Never panics on attacker-controlled input.
    pub fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<SessionClaims, TokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        if payload.is_empty() || signature.contains('.') {
            return Err(TokenError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::BadSignature)?;

        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::Malformed)?;
        mac.update(payload.as_bytes());
        // Constant-time comparison
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: SessionClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        if claims.sub.is_empty() || claims.exp < claims.iat {
            return Err(TokenError::Malformed);
        }
        if now.timestamp() > claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| UserError::Configuration(format!("invalid signing key: {}", e)))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn service() -> TokenService {
        TokenService::new(SECRET, 7 * 24 * 3600).unwrap()
    }

    fn user(role: Role) -> SessionUser {
        SessionUser {
            id: "01HZXUSER".to_string(),
            email: "admin@demo.test".to_string(),
            display_name: "Demo Admin".to_string(),
            role,
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000, 0).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let service = service();
        for role in Role::ALL {
            let token = service.issue_at(&user(role), t0()).unwrap();
            let claims = service.verify_at(&token, t0()).unwrap();
            assert_eq!(claims.user(), user(role));
            assert_eq!(claims.iat, t0().timestamp());
            assert_eq!(claims.exp, t0().timestamp() + 7 * 24 * 3600);
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let service = service();
        let token = service.issue_at(&user(Role::Reader), t0()).unwrap();
        let ttl = service.ttl();

        let just_before = t0() + ttl - Duration::seconds(1);
        let just_after = t0() + ttl + Duration::seconds(1);

        assert!(service.verify_at(&token, just_before).is_ok());
        assert_eq!(
            service.verify_at(&token, just_after),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let service = service();
        let token = service.issue_at(&user(Role::Admin), t0()).unwrap();
        let dot = token.find('.').unwrap();

        for i in (dot + 1)..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            assert!(
                service.verify_at(&tampered, t0()).is_err(),
                "flipping byte {} must invalidate the token",
                i
            );
        }
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let service = service();
        let token = service.issue_at(&user(Role::Reader), t0()).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let mut claims = service.verify_at(&token, t0()).unwrap();
        claims.role = Role::Admin;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let forged = format!("{}.{}", forged_payload, signature);

        assert_eq!(
            service.verify_at(&forged, t0()),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_other_secret_rejected() {
        let token = service().issue_at(&user(Role::Admin), t0()).unwrap();
        let other = TokenService::new(b"ffffffffffffffffffffffffffffffff", 3600).unwrap();
        assert_eq!(other.verify_at(&token, t0()), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_garbage_input_never_panics() {
        let service = service();
        let inputs = [
            "",
            ".",
            "..",
            "abc",
            "abc.",
            ".abc",
            "a.b.c",
            "%%%.%%%",
            "eyJzdWIiOiJ4In0.",
            "🦀.🦀",
        ];
        for input in inputs {
            assert!(service.verify_at(input, t0()).is_err(), "{:?}", input);
        }
    }

    #[test]
    fn test_tokens_are_unique() {
        let service = service();
        let a = service.issue_at(&user(Role::Reader), t0()).unwrap();
        let b = service.issue_at(&user(Role::Reader), t0()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_is_idempotent() {
        let service = service();
        let token = service.issue_at(&user(Role::Author), t0()).unwrap();
        let first = service.verify_at(&token, t0()).unwrap();
        assert_eq!(service.verify_at(&token, t0()).unwrap(), first);
    }

    #[test]
    fn test_ttl_out_of_range_rejected() {
        for ttl in [0, -1, MAX_TOKEN_TTL_SECONDS + 1, i64::MAX] {
            assert!(
                matches!(TokenService::new(SECRET, ttl), Err(UserError::Configuration(_))),
                "{}",
                ttl
            );
        }
        let longest = TokenService::new(SECRET, MAX_TOKEN_TTL_SECONDS).unwrap();
        let token = longest.issue_at(&user(Role::Reader), t0()).unwrap();
        let claims = longest.verify_at(&token, t0()).unwrap();
        assert_eq!(claims.exp - claims.iat, MAX_TOKEN_TTL_SECONDS);
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(matches!(
            TokenService::new(b"short", 60),
            Err(UserError::Configuration(_))
        ));
    }
}
