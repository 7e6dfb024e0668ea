use anyhow::{anyhow, Result};
use api::ApiConfig;
use tracing::info;

use crate::utils::env_paths::EnvPaths;

/// Run the API server in the foreground until it stops or Ctrl-C.
pub async fn execute(env_paths: &EnvPaths, host: String, port: u16) -> Result<()> {
    let users = super::open_user_manager(env_paths).await?;

    if !users.verify_integrity().await? {
        return Err(anyhow!("Credential store failed its integrity check"));
    }
    info!(
        "Credential store at {:?}",
        env_paths.user_database_config().database_path
    );

    let config = ApiConfig::new().with_host(host).with_port(port);

    tokio::select! {
        result = api::start_server_with_config(users, config) => {
            result.map_err(|e| anyhow!(e))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("API server stopped");
    Ok(())
}
