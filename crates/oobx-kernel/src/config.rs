//! Configuration loading from `~/.oobx/config.toml` with defaults.

use oobx_types::config::OobConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable overriding the oobx home directory.
pub const HOME_ENV: &str = "OOBX_HOME";

/// Load engine configuration from a TOML file, with defaults.
///
/// A missing or unreadable file is not an error: the defaults are used and
/// the problem is logged.
pub fn load_config(path: Option<&Path>) -> OobConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return OobConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<OobConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                OobConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            OobConfig::default()
        }
    }
}

/// Get the oobx home directory (`$OOBX_HOME` or `~/.oobx`).
pub fn oobx_home() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".oobx")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    oobx_home().join("config.toml")
}

/// The database path for `config`, defaulting under the home directory.
pub fn database_path(config: &OobConfig) -> PathBuf {
    config
        .database_path
        .clone()
        .unwrap_or_else(|| oobx_home().join("data").join("oobx.db"))
}
