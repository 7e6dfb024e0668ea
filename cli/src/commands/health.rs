use crate::utils::env_paths::{get_environment, EnvPaths};
use anyhow::Result;
use api::models::HealthResponse;
use colored::*;
use serde_json::json;
use user::database::UserDatabase;
use user::{SecureLogConfig, SecureLogger};

/// Execute the health check command
pub async fn execute(env_paths: &EnvPaths, format: String, server: String) -> Result<()> {
    let health_status = check_system_health(env_paths, &server).await;

    match format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&health_status)?);
        }
        _ => {
            print_health_status_text(&health_status);
        }
    }

    Ok(())
}

/// Check the health of various system components
async fn check_system_health(env_paths: &EnvPaths, server: &str) -> serde_json::Value {
    let mut status = json!({
        "status": "healthy",
        "environment": get_environment(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "components": {}
    });

    status["components"]["credential_store"] = check_credential_store(env_paths).await;
    status["components"]["audit_log"] = check_audit_log(env_paths).await;
    status["components"]["api"] = check_api_health(server).await;

    let all_healthy = status["components"]
        .as_object()
        .map(|components| {
            components
                .values()
                .all(|v| v["status"].as_str().unwrap_or("unknown") == "healthy")
        })
        .unwrap_or(false);

    if !all_healthy {
        status["status"] = json!("degraded");
    }

    status
}

/// Open the credential store read-only in spirit: nothing is created when it
/// does not exist yet.
async fn check_credential_store(env_paths: &EnvPaths) -> serde_json::Value {
    let config = env_paths.user_database_config();
    let db_path = config.database_path.clone();

    if !db_path.exists() {
        return json!({
            "status": "not_initialized",
            "message": "Credential store does not exist yet",
            "path": db_path.display().to_string()
        });
    }

    let database = match UserDatabase::new(config).await {
        Ok(database) => database,
        Err(e) => {
            return json!({
                "status": "unhealthy",
                "message": format!("Credential store cannot be opened: {}", e),
                "path": db_path.display().to_string()
            });
        }
    };

    let users = database.list_users().await.map(|users| users.len());
    let integrity = database.verify_integrity().await;

    match (integrity, users) {
        (Ok(true), Ok(count)) => json!({
            "status": "healthy",
            "message": "Credential store is accessible",
            "path": db_path.display().to_string(),
            "users": count
        }),
        (Ok(false), _) => json!({
            "status": "unhealthy",
            "message": "Integrity check failed",
            "path": db_path.display().to_string()
        }),
        (Err(e), _) | (_, Err(e)) => json!({
            "status": "unhealthy",
            "message": format!("Credential store query failed: {}", e),
            "path": db_path.display().to_string()
        }),
    }
}

async fn check_audit_log(env_paths: &EnvPaths) -> serde_json::Value {
    let path = env_paths.audit_log_path();

    if !path.exists() {
        return json!({
            "status": "not_initialized",
            "message": "No audit log written yet",
            "path": path.display().to_string()
        });
    }

    let logger = match SecureLogger::new(SecureLogConfig {
        log_path: path.clone(),
        ..SecureLogConfig::default()
    }) {
        Ok(logger) => logger,
        Err(e) => {
            return json!({
                "status": "unhealthy",
                "message": format!("Audit log cannot be read: {}", e),
                "path": path.display().to_string()
            });
        }
    };

    match logger.verify_log_chain().await {
        Ok(true) => json!({
            "status": "healthy",
            "message": "Audit chain intact",
            "path": path.display().to_string()
        }),
        Ok(false) => json!({
            "status": "unhealthy",
            "message": "Audit chain broken",
            "path": path.display().to_string()
        }),
        Err(e) => json!({
            "status": "unhealthy",
            "message": format!("Audit log cannot be verified: {}", e),
            "path": path.display().to_string()
        }),
    }
}

/// Check API health
async fn check_api_health(server: &str) -> serde_json::Value {
    let server = server.trim_end_matches('/');
    let api_url = format!("{}/api/v1/health", server);

    match reqwest::get(&api_url).await {
        Ok(response) if response.status().is_success() => {
            match response.json::<HealthResponse>().await {
                Ok(health) => json!({
                    "status": "healthy",
                    "message": format!("API server {} is running", health.version),
                    "endpoint": server,
                    "database_connected": health.database.connected
                }),
                Err(e) => json!({
                    "status": "unhealthy",
                    "message": format!("Unexpected health response: {}", e),
                    "endpoint": server
                }),
            }
        }
        Ok(response) => json!({
            "status": "unhealthy",
            "message": format!("API server returned status: {}", response.status()),
            "endpoint": server
        }),
        Err(_) => json!({
            "status": "offline",
            "message": "API server is not running or not reachable",
            "endpoint": server
        }),
    }
}

/// Print health status in a formatted text output
fn print_health_status_text(status: &serde_json::Value) {
    println!("{}", "=== Marain Auth Health Check ===".bold());
    println!();

    let overall_status = status["status"].as_str().unwrap_or("unknown");
    let status_display = match overall_status {
        "healthy" => "HEALTHY".green().bold(),
        "degraded" => "DEGRADED".yellow().bold(),
        "unhealthy" => "UNHEALTHY".red().bold(),
        _ => "UNKNOWN".white().bold(),
    };

    println!("Overall Status: {}", status_display);
    println!("Environment: {}", status["environment"].as_str().unwrap_or(""));
    println!("Timestamp: {}", status["timestamp"].as_str().unwrap_or(""));
    println!();

    println!("{}", "Components:".bold());
    println!("{}", "─".repeat(50));

    if let Some(components) = status["components"].as_object() {
        for (name, component) in components {
            let comp_status = component["status"].as_str().unwrap_or("unknown");
            let status_icon = match comp_status {
                "healthy" => "✓".green(),
                "unhealthy" => "✗".red(),
                "offline" | "not_initialized" => "○".white(),
                _ => "?".white(),
            };

            let status_text = match comp_status {
                "healthy" => comp_status.green(),
                "unhealthy" => comp_status.red(),
                _ => comp_status.white(),
            };

            println!(
                "{} {} ({})",
                status_icon,
                name.to_uppercase().bold(),
                status_text
            );

            if let Some(message) = component["message"].as_str() {
                println!("  {}", message);
            }
            if let Some(users) = component["users"].as_u64() {
                println!("  Users: {}", users);
            }

            println!();
        }
    }
}
