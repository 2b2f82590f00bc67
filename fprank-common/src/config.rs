//! Configuration loading and database path resolution
//!
//! Bootstrap settings only (database location, HTTP port, logging) live in
//! TOML. Runtime tuning lives in the database `settings` table.
//!
//! A missing TOML file is not an error: the built-in defaults are used and a
//! warning is logged.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Error, Result};

/// Environment variable overriding the database path
pub const DATABASE_ENV_VAR: &str = "FPRANK_DATABASE";

/// Environment variable overriding the TOML config location
pub const CONFIG_ENV_VAR: &str = "FPRANK_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            port: default_port(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_port() -> u16 {
    5740
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load TOML config following priority order:
/// 1. Explicit path (command-line argument)
/// 2. `FPRANK_CONFIG` environment variable
/// 3. Platform config file (`~/.config/fprank/config.toml`, then `/etc/fprank/config.toml`)
/// 4. Built-in defaults
///
/// An explicitly named file that does not exist is an error; an absent
/// platform file is not.
pub fn load_toml_config(cli_path: Option<&Path>) -> Result<TomlConfig> {
    let explicit = cli_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found: {}", path.display())));
        }
        return read_toml_config(&path);
    }

    match platform_config_file() {
        Some(path) => read_toml_config(&path),
        None => {
            warn!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Serialize config to a TOML file, creating parent directories
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Database path resolution priority:
/// 1. Command-line argument (highest priority)
/// 2. `FPRANK_DATABASE` environment variable
/// 3. TOML `database_path`
/// 4. OS-dependent default under the data directory
pub fn resolve_database_path(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATABASE_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.database_path {
        return path.clone();
    }

    default_database_path()
}

/// Get OS-dependent default database path
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fprank").join("fprank.db"))
        .unwrap_or_else(|| PathBuf::from("./fprank_data/fprank.db"))
}

fn platform_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("fprank").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/fprank/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}
