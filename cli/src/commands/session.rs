//! Remote session commands.
//!
//! `marc session` talks to a running server and mirrors the result in a local
//! [`ClientSessionCache`]. The cache only decides what to print; the server
//! re-checks the token on every call.

use anyhow::{anyhow, Result};
use api::error::ApiErrorResponse;
use api::models::{AuthSuccessResponse, LoginRequestBody, SessionResponse};
use authz::Role;
use client_cache::{CachedIdentity, ClientSessionCache, Reconciliation};
use colored::*;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use crate::utils::env_paths::EnvPaths;

fn open_cache(env_paths: &EnvPaths) -> Result<ClientSessionCache> {
    Ok(ClientSessionCache::open(env_paths.client_cache_path())?)
}

/// Redirects are not followed: a 307 from the edge guard means "no session".
fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?)
}

fn endpoint(server: &str, path: &str) -> String {
    format!("{}/api/v1{}", server.trim_end_matches('/'), path)
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.json::<ApiErrorResponse>().await {
        Ok(body) => body.error.message,
        Err(_) => format!("Server returned status: {}", status),
    }
}

pub async fn login(
    env_paths: &EnvPaths,
    server: String,
    email: String,
    password: String,
) -> Result<()> {
    let cache = open_cache(env_paths)?;
    let response = http_client()?
        .post(endpoint(&server, "/auth/login"))
        .json(&LoginRequestBody { email, password })
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(anyhow!("Login failed: {}", error_message(response).await));
    }

    let body: AuthSuccessResponse = response.json().await?;
    cache.store_token(&body.token)?;
    cache.login(CachedIdentity {
        id: body.user.id,
        email: body.user.email.clone(),
        display_name: body.user.display_name,
        role: body.user.role,
    })?;

    println!(
        "{} as {} ({})",
        "Logged in".green().bold(),
        body.user.email,
        body.user.role
    );
    Ok(())
}

/// Ask the server who the stored token belongs to and bring the cache in line.
pub async fn whoami(env_paths: &EnvPaths, server: String) -> Result<()> {
    let cache = open_cache(env_paths)?;

    let Some(token) = cache.token()? else {
        cache.reconcile(None)?;
        println!("{}", "Not logged in".yellow());
        return Ok(());
    };

    let response = http_client()?
        .get(endpoint(&server, "/auth/me"))
        .bearer_auth(&token)
        .send()
        .await?;
    let status = response.status();
    debug!("GET /auth/me -> {}", status);

    if status == StatusCode::UNAUTHORIZED || status.is_redirection() {
        if cache.reconcile(None)? == Reconciliation::Cleared {
            println!("{}", "Session expired or revoked; cached identity cleared".yellow());
        } else {
            println!("{}", "Not logged in".yellow());
        }
        return Ok(());
    }
    if !status.is_success() {
        return Err(anyhow!(error_message(response).await));
    }

    let user: SessionResponse = response.json().await?;
    let reconciliation = cache.reconcile(Some(CachedIdentity {
        id: user.id.clone(),
        email: user.email.clone(),
        display_name: user.display_name.clone(),
        role: user.role,
    }))?;
    if reconciliation == Reconciliation::Updated {
        println!("{}", "Cached identity updated from server".yellow());
    }

    println!("{} ({})", user.email.bold(), user.display_name);
    println!("Role: {}", user.role);
    println!("Id:   {}", user.id);
    Ok(())
}

pub async fn logout(env_paths: &EnvPaths, server: String) -> Result<()> {
    let cache = open_cache(env_paths)?;

    if let Some(token) = cache.token()? {
        // Tokens are stateless; the server call only clears cookies
        let result = http_client()?
            .post(endpoint(&server, "/auth/logout"))
            .bearer_auth(&token)
            .send()
            .await;
        if let Err(e) = result {
            warn!("Logout request failed: {}", e);
        }
    }

    cache.logout()?;
    println!("{}", "Logged out".green().bold());
    Ok(())
}

/// Show the cached identity without contacting the server.
pub fn status(env_paths: &EnvPaths) -> Result<()> {
    let cache = open_cache(env_paths)?;
    let entry = cache.current()?;

    match (&entry.identity, entry.is_authenticated) {
        (Some(identity), true) => {
            println!("{} ({})", identity.email.bold(), identity.role);
            if let Some(updated) = entry.updated_at {
                println!("Cached at: {}", updated.to_rfc3339());
            }
        }
        _ => println!("{}", "Not logged in".yellow()),
    }
    Ok(())
}

/// Advisory check against the cached role. The server decides for real.
pub fn can(env_paths: &EnvPaths, role: Role) -> Result<()> {
    let cache = open_cache(env_paths)?;
    if cache.has_permission(role) {
        println!("{}: {}", role, "allowed".green());
    } else {
        println!("{}: {}", role, "denied".red());
    }
    Ok(())
}
