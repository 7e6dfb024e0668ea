pub mod audit;
pub mod health;
pub mod serve;
pub mod session;
pub mod token;
pub mod users;

use anyhow::Result;
use std::sync::Arc;

use crate::utils::env_paths::EnvPaths;

/// Open the credential store the server would use, with configuration from
/// the environment.
pub async fn open_user_manager(env_paths: &EnvPaths) -> Result<Arc<user::UserManager>> {
    let auth_config = user::auth::AuthConfig::new()?;
    let manager = user::UserManager::new(env_paths.user_database_config(), auth_config).await?;
    Ok(Arc::new(manager))
}
