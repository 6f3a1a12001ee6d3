//! Configuration file loading.
//!
//! User config location: $XDG_CONFIG_HOME/workbridge/workbridge.toml
//! Fallback: the platform config directory (`dirs::config_dir()`).

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::settings::WorkbridgeSettings;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Returns the path to the user configuration file.
///
/// The path is determined by:
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/workbridge/workbridge.toml
/// 2. Otherwise: <platform config dir>/workbridge/workbridge.toml
///
/// Returns None if neither can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg_config) if !xdg_config.is_empty() => PathBuf::from(xdg_config),
        _ => dirs::config_dir()?,
    };
    Some(base.join("workbridge").join("workbridge.toml"))
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> ConfigResult<WorkbridgeSettings> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: WorkbridgeSettings =
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    settings.pool.validate()?;

    log::debug!(
        target: "workbridge::config",
        "Loaded configuration from {}",
        path.display()
    );
    Ok(settings)
}

/// Load the user-wide configuration file.
///
/// Returns `Ok(None)` when there is no such file.
pub fn load_user_config() -> ConfigResult<Option<WorkbridgeSettings>> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    load_config(&path).map(Some)
}
