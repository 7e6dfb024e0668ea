//! Session resolution from request cookies, and the session cookie itself.
//!
//! Two trust paths exist, tried in order:
//!
//! 1. the signed session token (cookie, or `Authorization: Bearer` for API
//!    clients), verified with [`TokenService`]
//! 2. the legacy `user` cookie holding an unsigned JSON identity
//!
//! The legacy path is a migration shim. It is switched off with
//! `AuthConfig::accept_legacy_cookie = false` and should be deleted once no
//! such cookies are left in the wild.
//!
//! A legacy identity never carries a role above `reader`, whatever the cookie
//! claims. Anything that grants privileges must use [`SessionResolver::resolve_token`].
//!
//! Neither path consults the credential store. A role change or deactivation
//! only shows up once a new token is issued, at most one token TTL later.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use authz::Role;

use super::config::AuthConfig;
use super::token::{SessionClaims, TokenService};
use super::types::SessionUser;

/// Cookies (and bearer token) of one inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestCookies {
    cookies: HashMap<String, String>,
    bearer: Option<String>,
}

impl RequestCookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every `Cookie` header plus an optional bearer token.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cookies = Self::new();
        for value in headers.get_all(COOKIE) {
            if let Ok(value) = value.to_str() {
                cookies.extend_from_header(value);
            }
        }
        cookies.bearer = extract_bearer_token(headers);
        cookies
    }

    /// Parse a raw `Cookie` header value.
    pub fn from_header_str(header: &str) -> Self {
        let mut cookies = Self::new();
        cookies.extend_from_header(header);
        cookies
    }

    fn extend_from_header(&mut self, header: &str) {
        for pair in header.split(';') {
            let Some((key, val)) = pair.trim().split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            // First occurrence wins, matching browser ordering of more specific paths
            self.cookies
                .entry(key.to_string())
                .or_insert_with(|| val.trim().trim_matches('"').to_string());
        }
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    /// Token candidates in trial order: the named cookie, then the bearer
    /// token when it differs.
    pub fn tokens<'a>(&'a self, cookie_name: &str) -> impl Iterator<Item = &'a str> {
        let cookie = self.get(cookie_name);
        let bearer = self.bearer().filter(|b| Some(*b) != cookie);
        cookie.into_iter().chain(bearer)
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Which path produced an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Verified signed token
    PrimaryToken(SessionClaims),
    /// Unsigned legacy cookie. Removable once migration completes.
    LegacyCookie(SessionUser),
    Anonymous,
}

impl Resolution {
    pub fn user(&self) -> Option<SessionUser> {
        match self {
            Resolution::PrimaryToken(claims) => Some(claims.user()),
            Resolution::LegacyCookie(user) => Some(user.clone()),
            Resolution::Anonymous => None,
        }
    }
}

/// Server-side `resolve(request) -> identity | none`.
#[derive(Debug, Clone)]
pub struct SessionResolver {
    tokens: Arc<TokenService>,
    cookie_name: String,
    legacy_cookie_name: String,
    accept_legacy_cookie: bool,
}

impl SessionResolver {
    pub fn new(tokens: Arc<TokenService>, config: &AuthConfig) -> Self {
        Self {
            tokens,
            cookie_name: config.cookie_name.clone(),
            legacy_cookie_name: config.legacy_cookie_name.clone(),
            accept_legacy_cookie: config.accept_legacy_cookie,
        }
    }

    pub fn resolve(&self, cookies: &RequestCookies) -> Option<SessionUser> {
        self.resolve_at(cookies, Utc::now())
    }

    pub fn resolve_at(&self, cookies: &RequestCookies, now: DateTime<Utc>) -> Option<SessionUser> {
        self.classify_at(cookies, now).user()
    }

    /// Signed-token path only. The legacy cookie is never consulted.
    pub fn resolve_token(&self, cookies: &RequestCookies) -> Option<SessionUser> {
        self.verify_token_at(cookies, Utc::now())
            .map(|claims| claims.user())
    }

    /// First token candidate that verifies. A stale cookie does not hide a
    /// valid bearer token.
    pub fn verify_token_at(
        &self,
        cookies: &RequestCookies,
        now: DateTime<Utc>,
    ) -> Option<SessionClaims> {
        cookies
            .tokens(&self.cookie_name)
            .find_map(|token| match self.tokens.verify_at(token, now) {
                Ok(claims) => Some(claims),
                Err(e) => {
                    debug!("session token rejected: {}", e);
                    None
                }
            })
    }

    /// Resolve and report which path answered.
    pub fn classify_at(&self, cookies: &RequestCookies, now: DateTime<Utc>) -> Resolution {
        if let Some(claims) = self.verify_token_at(cookies, now) {
            return Resolution::PrimaryToken(claims);
        }

        if self.accept_legacy_cookie {
            if let Some(mut user) = cookies
                .get(&self.legacy_cookie_name)
                .and_then(parse_legacy_cookie)
            {
                if user.role != Role::Reader {
                    debug!(
                        "legacy cookie for {} claims role {}, using reader",
                        user.id, user.role
                    );
                    user.role = Role::Reader;
                }
                debug!("session resolved from legacy cookie for {}", user.id);
                return Resolution::LegacyCookie(user);
            }
        }

        Resolution::Anonymous
    }
}

/// Shape of the legacy JSON identity cookie. Everything but the id is optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyUserCookie {
    #[serde(default, alias = "_id", alias = "userId")]
    id: Option<serde_json::Value>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "name", alias = "username")]
    display_name: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

/// Parse a legacy cookie value. Any failure, or a missing id, yields `None`.
///
/// Unknown or missing roles fall back to `reader`. The parsed role is only
/// what the cookie claims; [`SessionResolver`] caps it at `reader`.
pub fn parse_legacy_cookie(raw: &str) -> Option<SessionUser> {
    let decoded = urlencoding::decode(raw).ok()?;
    let legacy: LegacyUserCookie = serde_json::from_str(&decoded).ok()?;

    let id = match legacy.id? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let id = id.trim().to_string();
    if id.is_empty() {
        return None;
    }

    let role = legacy
        .role
        .and_then(|r| r.parse::<Role>().ok())
        .unwrap_or(Role::Reader);

    Some(SessionUser {
        id,
        email: legacy.email.unwrap_or_default(),
        display_name: legacy.display_name.unwrap_or_default(),
        role,
    })
}

/// `Set-Cookie` value carrying a freshly issued token.
pub fn session_cookie(config: &AuthConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&cookie_string(
        config,
        &config.cookie_name,
        token,
        config.token_ttl_seconds,
    ))
}

/// `Set-Cookie` value expiring the session cookie.
pub fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&cookie_string(config, &config.cookie_name, "", 0))
}

/// `Set-Cookie` value expiring the legacy cookie, sent on logout.
pub fn clear_legacy_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&cookie_string(config, &config.legacy_cookie_name, "", 0))
}

fn cookie_string(config: &AuthConfig, name: &str, value: &str, max_age: i64) -> String {
    let mut cookie = format!(
        "{name}={value}; Path=/; SameSite={}; Max-Age={max_age}",
        config.same_site.as_attribute()
    );
    if config.http_only {
        cookie.push_str("; HttpOnly");
    }
    if config.secure {
        cookie.push_str("; Secure");
    }
    cookie
}
