use anyhow::{anyhow, Result};
use authz::Role;
use colored::*;
use user::auth::types::normalize_email;
use user::{Identity, SessionUser, UserManager};

use crate::utils::env_paths::EnvPaths;

/// Actor recorded in the audit log for changes made from the command line
fn cli_actor() -> SessionUser {
    SessionUser {
        id: "cli".to_string(),
        email: "marc@localhost".to_string(),
        display_name: "marc".to_string(),
        role: Role::Admin,
    }
}

/// Accept either an email address or a user id
async fn resolve_user_id(manager: &UserManager, user: &str) -> Result<String> {
    if !user.contains('@') {
        return Ok(user.to_string());
    }
    manager
        .database()
        .find_by_email(&normalize_email(user))
        .await?
        .map(|stored| stored.identity.id)
        .ok_or_else(|| anyhow!("User not found: {}", user))
}

pub async fn add(
    env_paths: &EnvPaths,
    email: String,
    name: String,
    password: String,
    role: Role,
) -> Result<()> {
    let manager = super::open_user_manager(env_paths).await?;
    let identity = manager
        .auth()
        .create_user(&email, &name, &password, role)
        .await?;

    println!(
        "{} {} ({}) as {}",
        "Created".green().bold(),
        identity.email,
        identity.id,
        identity.role
    );
    Ok(())
}

pub async fn list(env_paths: &EnvPaths, format: String) -> Result<()> {
    let manager = super::open_user_manager(env_paths).await?;
    let users = manager.database().list_users().await?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&users)?),
        _ => print_users_text(&users),
    }
    Ok(())
}

pub async fn set_role(env_paths: &EnvPaths, user: String, role: Role) -> Result<()> {
    let manager = super::open_user_manager(env_paths).await?;
    let id = resolve_user_id(&manager, &user).await?;
    let identity = manager.auth().set_role(&cli_actor(), &id, role).await?;

    println!(
        "{} {} is now {}",
        "Updated".green().bold(),
        identity.email,
        identity.role
    );
    println!(
        "{}",
        "Existing sessions keep their old role until the user logs in again".yellow()
    );
    Ok(())
}

pub async fn set_active(env_paths: &EnvPaths, user: String, is_active: bool) -> Result<()> {
    let manager = super::open_user_manager(env_paths).await?;
    let id = resolve_user_id(&manager, &user).await?;
    let identity = manager
        .auth()
        .set_active(&cli_actor(), &id, is_active)
        .await?;

    let state = if identity.is_active {
        "active".green()
    } else {
        "inactive".red()
    };
    println!("{} {} is now {}", "Updated".green().bold(), identity.email, state);
    Ok(())
}

fn print_users_text(users: &[Identity]) {
    println!("{}", "=== Marain Users ===".bold());
    println!();

    for identity in users {
        let status = if identity.is_active {
            "active".green()
        } else {
            "inactive".red()
        };
        println!(
            "{} {} [{}] ({})",
            identity.email.bold(),
            identity.display_name,
            identity.role,
            status
        );
        println!("  id: {}", identity.id);
        if let Some(last_login) = identity.last_login_at {
            println!("  last login: {}", last_login.to_rfc3339());
        }
    }

    println!("{}", "─".repeat(50));
    println!("Total users: {}", users.len());
}
