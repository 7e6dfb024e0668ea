use anyhow::{anyhow, Result};
use colored::*;
use user::auth::types::normalize_email;
use user::auth::{AuthConfig, TokenService};
use user::{SessionClaims, SessionUser};

use crate::utils::env_paths::EnvPaths;

/// Verify a session token with the configured secret and show its claims.
pub async fn inspect(token: String, format: String) -> Result<()> {
    let tokens = TokenService::from_config(&AuthConfig::new()?)?;

    let claims = tokens
        .verify(token.trim())
        .map_err(|e| anyhow!("Token rejected: {}", e))?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&claims)?),
        _ => print_claims_text(&claims),
    }
    Ok(())
}

/// Issue a token for a stored user, as a successful login would.
pub async fn issue(env_paths: &EnvPaths, email: String) -> Result<()> {
    let manager = super::open_user_manager(env_paths).await?;
    let stored = manager
        .database()
        .find_by_email(&normalize_email(&email))
        .await?
        .ok_or_else(|| anyhow!("User not found: {}", email))?;

    if !stored.identity.is_active {
        return Err(anyhow!("User {} is deactivated", email));
    }

    let token = manager.tokens().issue(&SessionUser::from(&stored.identity))?;
    println!("{}", token);
    Ok(())
}

fn print_claims_text(claims: &SessionClaims) {
    println!("{}", "=== Session Token ===".bold());
    println!("Status:  {}", "VALID".green().bold());
    println!("Subject: {}", claims.sub);
    println!("Email:   {}", claims.email);
    println!("Name:    {}", claims.name);
    println!("Role:    {}", claims.role);
    if let Some(issued) = claims.issued_at() {
        println!("Issued:  {}", issued.to_rfc3339());
    }
    if let Some(expires) = claims.expires_at() {
        println!("Expires: {}", expires.to_rfc3339());
    }
    println!("Token id: {}", claims.jti);
}
