//! Authentication configuration: cookies, token signing secret, rate limits.

use std::env;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::rate_limit::RateLimitPolicy;
use crate::error::{Result, UserError};

/// Minimum accepted length of the token signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Seven days.
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// One year. Longer lifetimes are refused at startup.
pub const MAX_TOKEN_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Name of the signed session cookie
    pub cookie_name: String,
    /// Name of the legacy unsigned JSON identity cookie (read-only)
    pub legacy_cookie_name: String,
    /// Token lifetime in seconds, also the cookie Max-Age
    pub token_ttl_seconds: i64,
    /// Whether to use secure cookies (HTTPS only)
    pub secure: bool,
    /// SameSite cookie attribute
    pub same_site: SameSiteConfig,
    /// HTTP only cookie (not accessible via JavaScript)
    pub http_only: bool,
    /// HMAC signing key for session tokens
    #[serde(skip_serializing)]
    pub secret_key: Vec<u8>,
    /// Whether the legacy `user` cookie is still honored by the session resolver
    pub accept_legacy_cookie: bool,
    /// Whether self-registration may request a role above `reader`
    pub allow_self_assigned_roles: bool,
    /// Whether privileged actions re-read role and `is_active` from the
    /// credential store instead of trusting the token claims
    pub revalidate_privileged: bool,
    /// Login attempt limits
    pub rate_limit: RateLimitPolicy,
}

impl AuthConfig {
    /// Load the configuration from the process environment.
    ///
    /// Fails when `AUTH_TOKEN_SECRET` is missing, not base64, or shorter than
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string());
        let secret_key = Self::decode_secret(lookup("AUTH_TOKEN_SECRET"))?;

        let mut config = Self::with_secret(secret_key);
        config.secure = environment == "prd";

        if let Some(ttl) = lookup("AUTH_TOKEN_TTL_SECONDS") {
            config.token_ttl_seconds = parse_var("AUTH_TOKEN_TTL_SECONDS", &ttl)?;
            if !(1..=MAX_TOKEN_TTL_SECONDS).contains(&config.token_ttl_seconds) {
                return Err(UserError::Configuration(format!(
                    "AUTH_TOKEN_TTL_SECONDS must be between 1 and {}",
                    MAX_TOKEN_TTL_SECONDS
                )));
            }
        }
        if let Some(flag) = lookup("AUTH_ACCEPT_LEGACY_COOKIE") {
            config.accept_legacy_cookie = parse_var("AUTH_ACCEPT_LEGACY_COOKIE", &flag)?;
        }
        if let Some(flag) = lookup("AUTH_ALLOW_SELF_ASSIGNED_ROLES") {
            config.allow_self_assigned_roles = parse_var("AUTH_ALLOW_SELF_ASSIGNED_ROLES", &flag)?;
        }
        if let Some(flag) = lookup("AUTH_REVALIDATE_PRIVILEGED") {
            config.revalidate_privileged = parse_var("AUTH_REVALIDATE_PRIVILEGED", &flag)?;
        }
        if let Some(max) = lookup("AUTH_RATE_LIMIT_MAX_ATTEMPTS") {
            config.rate_limit.max_attempts = parse_var("AUTH_RATE_LIMIT_MAX_ATTEMPTS", &max)?;
        }
        if let Some(window) = lookup("AUTH_RATE_LIMIT_WINDOW_SECONDS") {
            config.rate_limit.window_seconds = parse_var("AUTH_RATE_LIMIT_WINDOW_SECONDS", &window)?;
        }

        Ok(config)
    }

    /// Default settings around an explicit secret.
    pub fn with_secret(secret_key: Vec<u8>) -> Self {
        Self {
            cookie_name: "auth-token".to_string(),
            legacy_cookie_name: "user".to_string(),
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            secure: false,
            same_site: SameSiteConfig::Lax,
            http_only: true,
            secret_key,
            accept_legacy_cookie: true,
            allow_self_assigned_roles: false,
            revalidate_privileged: false,
            rate_limit: RateLimitPolicy::default(),
        }
    }

    fn decode_secret(raw: Option<String>) -> Result<Vec<u8>> {
        let key_str =
            raw.ok_or_else(|| UserError::Configuration("AUTH_TOKEN_SECRET not set".to_string()))?;

        let key = BASE64
            .decode(key_str.trim().as_bytes())
            .map_err(|e| UserError::Configuration(format!("Invalid BASE64 secret key: {}", e)))?;

        if key.len() < MIN_SECRET_LEN {
            return Err(UserError::Configuration(format!(
                "AUTH_TOKEN_SECRET must decode to at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        Ok(key)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| UserError::Configuration(format!("Invalid value for {}: {}", name, value)))
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            warn!("Failed to load auth config: {}. Using random key.", e);
            // Tokens signed with this key do not survive a restart
            let mut secret_key = vec![0u8; MIN_SECRET_LEN];
            use rand::RngCore;
            rand::thread_rng().fill_bytes(&mut secret_key);
            Self::with_secret(secret_key)
        })
    }
}

/// SameSite cookie configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSiteConfig {
    Strict,
    Lax,
    None,
}

impl SameSiteConfig {
    pub fn as_attribute(self) -> &'static str {
        match self {
            SameSiteConfig::Strict => "Strict",
            SameSiteConfig::Lax => "Lax",
            SameSiteConfig::None => "None",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn secret_b64() -> String {
        BASE64.encode(b"test_secret_key_1234567890123456789012")
    }

    #[test]
    fn test_config_from_env() {
        let secret = secret_b64();
        let config = AuthConfig::from_lookup(lookup_from(&[("AUTH_TOKEN_SECRET", &secret)])).unwrap();

        assert_eq!(config.cookie_name, "auth-token");
        assert_eq!(config.legacy_cookie_name, "user");
        assert_eq!(config.token_ttl_seconds, 604_800);
        assert_eq!(config.same_site, SameSiteConfig::Lax);
        assert!(!config.secure);
        assert!(config.http_only);
        assert!(config.accept_legacy_cookie);
        assert!(!config.allow_self_assigned_roles);
        assert!(!config.revalidate_privileged);
        assert_eq!(config.rate_limit.max_attempts, 5);
        assert_eq!(config.rate_limit.window_seconds, 900);
    }

    #[test]
    fn test_production_uses_secure_cookies() {
        let secret = secret_b64();
        let config = AuthConfig::from_lookup(lookup_from(&[
            ("AUTH_TOKEN_SECRET", &secret),
            ("ENVIRONMENT", "prd"),
        ]))
        .unwrap();
        assert!(config.secure);
    }

    #[test]
    fn test_missing_secret_is_an_error() {
        let result = AuthConfig::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(UserError::Configuration(_))));
    }

    #[test]
    fn test_short_secret_is_rejected() {
        let short = BASE64.encode(b"too-short");
        let result = AuthConfig::from_lookup(lookup_from(&[("AUTH_TOKEN_SECRET", &short)]));
        assert!(matches!(result, Err(UserError::Configuration(_))));
    }

    #[test]
    fn test_overrides() {
        let secret = secret_b64();
        let config = AuthConfig::from_lookup(lookup_from(&[
            ("AUTH_TOKEN_SECRET", &secret),
            ("AUTH_TOKEN_TTL_SECONDS", "3600"),
            ("AUTH_ACCEPT_LEGACY_COOKIE", "false"),
            ("AUTH_REVALIDATE_PRIVILEGED", "true"),
            ("AUTH_RATE_LIMIT_MAX_ATTEMPTS", "3"),
            ("AUTH_RATE_LIMIT_WINDOW_SECONDS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.token_ttl_seconds, 3600);
        assert!(!config.accept_legacy_cookie);
        assert!(config.revalidate_privileged);
        assert_eq!(config.rate_limit.max_attempts, 3);
        assert_eq!(config.rate_limit.window_seconds, 60);
    }

    #[test]
    fn test_token_ttl_is_bounded() {
        let secret = secret_b64();
        for ttl in ["0", "-5", "31536001", "9223372036854775807"] {
            let result = AuthConfig::from_lookup(lookup_from(&[
                ("AUTH_TOKEN_SECRET", &secret),
                ("AUTH_TOKEN_TTL_SECONDS", ttl),
            ]));
            assert!(matches!(result, Err(UserError::Configuration(_))), "{}", ttl);
        }

        let config = AuthConfig::from_lookup(lookup_from(&[
            ("AUTH_TOKEN_SECRET", &secret),
            ("AUTH_TOKEN_TTL_SECONDS", "31536000"),
        ]))
        .unwrap();
        assert_eq!(config.token_ttl_seconds, MAX_TOKEN_TTL_SECONDS);
    }

    #[test]
    fn test_invalid_override_is_an_error() {
        let secret = secret_b64();
        let result = AuthConfig::from_lookup(lookup_from(&[
            ("AUTH_TOKEN_SECRET", &secret),
            ("AUTH_RATE_LIMIT_MAX_ATTEMPTS", "five"),
        ]));
        assert!(matches!(result, Err(UserError::Configuration(_))));
    }
}
