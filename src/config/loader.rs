//! Configuration loading and discovery for `pxw.toml`
//!
//! Provides functions to find, load, and merge configuration.

use super::schema::PxwConfig;
use crate::scheduler::ScanMode;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the configuration file.
pub const CONFIG_FILE: &str = "pxw.toml";

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse pxw.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
}

/// CLI arguments that can override config values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub base_url: Option<String>,
    pub tile_size: Option<u32>,
    pub auth_token: Option<String>,
    pub mode: Option<ScanMode>,
    pub low_activity: Option<bool>,
    pub protect: Option<bool>,
    pub seed: Option<u64>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
}

/// Find pxw.toml by walking up from the current working directory.
///
/// Search order:
/// 1. Walk up from current directory looking for pxw.toml
/// 2. Check XDG_CONFIG_HOME/pixelwarden/pxw.toml (or ~/.config/pixelwarden/pxw.toml)
pub fn find_config() -> Option<PathBuf> {
    if let Ok(cwd) = env::current_dir() {
        if let Some(path) = find_config_from(cwd) {
            return Some(path);
        }
    }

    find_xdg_config()
}

/// Find pxw.toml in the XDG config directory.
pub fn find_xdg_config() -> Option<PathBuf> {
    let xdg_config = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;

    let config_path = xdg_config.join("pixelwarden").join(CONFIG_FILE);
    if config_path.exists() {
        Some(config_path)
    } else {
        None
    }
}

/// Find pxw.toml by walking up from a specific directory.
pub fn find_config_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration from a pxw.toml file.
///
/// If a path is provided, loads from that file. Otherwise, uses `find_config()`
/// to locate the config file. If no config file is found, returns the default
/// configuration.
///
/// # Example
/// ```ignore
/// let config = load_config(None)?;
/// let config = load_config(Some(Path::new("deploy/pxw.toml")))?;
/// ```
pub fn load_config(path: Option<&Path>) -> Result<PxwConfig, ConfigError> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    match config_path {
        Some(p) => {
            tracing::debug!(path = %p.display(), "loading config");
            load_config_file(&p)
        }
        None => Ok(default_config()),
    }
}

fn load_config_file(path: &Path) -> Result<PxwConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config: PxwConfig = toml::from_str(&contents)?;
    validated(config)
}

fn validated(config: PxwConfig) -> Result<PxwConfig, ConfigError> {
    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
    }
    Ok(config)
}

/// Configuration used when no pxw.toml is found.
pub fn default_config() -> PxwConfig {
    PxwConfig::default()
}

/// Merge CLI overrides into a configuration.
///
/// CLI arguments take precedence over config file values.
pub fn merge_cli_overrides(config: &mut PxwConfig, overrides: &CliOverrides) {
    if let Some(ref base_url) = overrides.base_url {
        config.canvas.base_url = base_url.clone();
    }
    if let Some(tile_size) = overrides.tile_size {
        config.canvas.tile_size = tile_size;
    }
    if let Some(ref token) = overrides.auth_token {
        config.canvas.auth_token = Some(token.clone());
    }

    if let Some(mode) = overrides.mode {
        config.scheduler.mode = mode;
    }
    if let Some(low_activity) = overrides.low_activity {
        config.scheduler.low_activity = low_activity;
    }
    if let Some(protect) = overrides.protect {
        config.scheduler.protect = protect;
    }
    if let Some(seed) = overrides.seed {
        config.scheduler.seed = Some(seed);
    }

    if let Some(ref level) = overrides.log_level {
        config.logging.level = level.clone();
    }
    if let Some(json) = overrides.log_json {
        config.logging.json = json;
    }
}

/// Load the configuration, apply CLI overrides and validate the result.
pub fn resolve_config(
    path: Option<&Path>,
    overrides: &CliOverrides,
) -> Result<PxwConfig, ConfigError> {
    let mut config = load_config(path)?;
    merge_cli_overrides(&mut config, overrides);
    validated(config)
}
