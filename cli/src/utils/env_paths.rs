use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Environment-based path configuration
#[derive(Debug, Clone)]
pub struct EnvPaths {
    pub data_path: PathBuf,
    /// Where `marc session` keeps its cached identity and token
    pub client_path: PathBuf,
}

impl EnvPaths {
    /// Load paths from environment variables with defaults
    pub fn load() -> Result<Self> {
        Self::load_with_base(None)
    }

    /// Load paths from environment variables with an optional base directory
    /// This is primarily for testing purposes
    pub fn load_with_base(base_dir: Option<PathBuf>) -> Result<Self> {
        let base = if let Some(base) = base_dir {
            base
        } else {
            if let Ok(env_path) = env::current_dir() {
                let env_file = env_path.join(".env");
                if env_file.exists() {
                    dotenv::from_path(&env_file).ok();
                }
            }
            env::current_dir().context("Failed to get current directory")?
        };

        let data_path = Self::get_path_from_env("DATA_PATH", "./data", &base)?;
        let client_path = match env::var("MARC_CLIENT_PATH") {
            Ok(_) => Self::get_path_from_env("MARC_CLIENT_PATH", "", &base)?,
            Err(_) => data_path.join("client"),
        };

        Ok(Self {
            data_path,
            client_path,
        })
    }

    /// Get a path from environment variable or use default
    fn get_path_from_env(var_name: &str, default: &str, base_dir: &Path) -> Result<PathBuf> {
        let path_str = env::var(var_name).unwrap_or_else(|_| default.to_string());
        let path = PathBuf::from(path_str);

        if path.is_relative() {
            Ok(base_dir.join(path))
        } else {
            Ok(path)
        }
    }

    /// Directory holding the credential store and its audit log
    pub fn auth_path(&self) -> PathBuf {
        self.data_path.join("auth")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.auth_path().join("audit.log")
    }

    pub fn logs_path(&self) -> PathBuf {
        self.data_path.join("logs")
    }

    pub fn client_cache_path(&self) -> PathBuf {
        self.client_path.join("session.redb")
    }

    /// Credential store configuration rooted at [`Self::auth_path`]
    pub fn user_database_config(&self) -> user::UserDatabaseConfig {
        user::UserDatabaseConfig::in_dir(self.auth_path())
    }
}

/// Get the current environment (dev, staging, prd)
pub fn get_environment() -> String {
    env::var("ENVIRONMENT")
        .unwrap_or_else(|_| env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string()))
}
