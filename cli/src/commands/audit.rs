use anyhow::{anyhow, Result};
use colored::*;
use serde_json::json;
use user::{SecureLogConfig, SecureLogger};

use crate::utils::env_paths::EnvPaths;

/// Check the hash chain of the audit log.
pub async fn verify(env_paths: &EnvPaths, format: String) -> Result<()> {
    let path = env_paths.audit_log_path();
    if !path.exists() {
        return Err(anyhow!("No audit log at {}", path.display()));
    }

    let logger = SecureLogger::new(SecureLogConfig {
        log_path: path.clone(),
        ..SecureLogConfig::default()
    })?;
    let intact = logger.verify_log_chain().await?;
    let entries = logger.read_entries()?;

    match format.as_str() {
        "json" => {
            let report = json!({
                "path": path.display().to_string(),
                "intact": intact,
                "entries": entries.len(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("{}", "=== Audit Log ===".bold());
            println!("Path:    {}", path.display());
            println!("Entries: {}", entries.len());
            if intact {
                println!("Chain:   {}", "INTACT".green().bold());
            } else {
                println!("Chain:   {}", "BROKEN".red().bold());
            }
        }
    }

    if !intact {
        return Err(anyhow!("Audit log chain verification failed"));
    }
    Ok(())
}

/// Print the most recent audit entries.
pub async fn tail(env_paths: &EnvPaths, count: usize) -> Result<()> {
    let logger = SecureLogger::new(SecureLogConfig {
        log_path: env_paths.audit_log_path(),
        ..SecureLogConfig::default()
    })?;
    let entries = logger.read_entries()?;
    let skip = entries.len().saturating_sub(count);

    for entry in entries.iter().skip(skip) {
        println!("{}", serde_json::to_string(entry)?);
    }
    Ok(())
}
