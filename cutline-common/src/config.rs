//! Configuration file discovery and loading
//!
//! Resolution order for the audio core's tuning file:
//! 1. Explicit path passed by the caller (highest priority)
//! 2. `CUTLINE_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/cutline/audio.toml` on Linux)
//!
//! A missing file is not an error: callers fall back to compiled defaults and
//! a warning is logged. A file that exists but fails to parse is an error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CUTLINE_CONFIG";

/// File name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "audio.toml";

/// Logging section shared by every config file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Locate the config file following the resolution order above
///
/// Returns `None` when no candidate exists on disk.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("cutline").join(CONFIG_FILE_NAME))?;
    if user_config.exists() {
        Some(user_config)
    } else {
        debug!("No config file at {}", user_config.display());
        None
    }
}

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
}

/// Load `T` from a TOML file
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    parse_toml(&content)
}

/// Load `T` from the resolved config file, or `T::default()` when none exists
///
/// An explicit or env-provided path that does not exist falls back to
/// defaults with a warning.
pub fn load_or_default<T: DeserializeOwned + Default>(explicit: Option<&Path>) -> Result<T> {
    match resolve_config_path(explicit) {
        Some(path) if path.exists() => load_toml_file(&path),
        Some(path) => {
            warn!(
                "Config file {} not found, using compiled defaults",
                path.display()
            );
            Ok(T::default())
        }
        None => Ok(T::default()),
    }
}
