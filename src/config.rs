use std::env;
use std::path::PathBuf;

use thiserror::Error;

/// Startup configuration failures. These abort the run before any message
/// or candidate is touched; everything downstream uses per-item errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {name}")]
    MissingVar { name: &'static str },

    #[error("no usable data directory for the candidate database; set DATABASE_PATH")]
    NoDataDir,
}

/// Everything the batch jobs read from the environment, resolved once at
/// process start and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub gmail_access_token: String,
    pub db_path: PathBuf,
    pub downloads_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            gemini_api_key: require("GEMINI_API_KEY")?,
            gmail_access_token: require("GMAIL_ACCESS_TOKEN")?,
            db_path: database_path()?,
            downloads_dir: env::var_os("DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("downloads")),
        })
    }
}

/// Resolve the database path alone; `init` and the listing subcommands do
/// not need service credentials.
pub fn database_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = env::var_os("DATABASE_PATH") {
        return Ok(PathBuf::from(path));
    }
    match directories::ProjectDirs::from("", "", "gatehouse") {
        Some(proj_dirs) => Ok(proj_dirs.data_dir().join("gatehouse.db")),
        None => Err(ConfigError::NoDataDir),
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::MissingVar { name })
}
