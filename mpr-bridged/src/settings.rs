//! Daemon configuration loading

use std::io;
use std::path::{Path, PathBuf};

use mpr_mux::{BridgeConfig, MuxError};
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "MPR_BRIDGE_CONFIG";

/// Device name that selects the built-in simulated bus
pub const SIM_DEVICE: &str = "sim";

/// Errors that stop the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("could not determine config path; pass one or set MPR_BRIDGE_CONFIG")]
    NoConfigPath,

    #[error("failed to read {}: {source}", .path.display())]
    ReadConfig { path: PathBuf, source: io::Error },

    #[error("failed to parse {}: {source}", .path.display())]
    ParseConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Bus(#[from] MuxError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Get the XDG config directory for mpr-bridge
/// Uses $XDG_CONFIG_HOME/mpr-bridge, falls back to ~/.config/mpr-bridge
fn config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config);
        if path.is_absolute() {
            return Some(path.join("mpr-bridge"));
        }
    }

    dirs::home_dir().map(|h| h.join(".config").join("mpr-bridge"))
}

/// Pick the config file: explicit argument, then `$MPR_BRIDGE_CONFIG`,
/// then `config.json` in the XDG config directory
pub fn resolve_config_path(
    arg: Option<String>,
    env: Option<String>,
) -> Result<PathBuf, DaemonError> {
    arg.or(env)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| config_dir().map(|d| d.join("config.json")))
        .ok_or(DaemonError::NoConfigPath)
}

/// Read, parse and validate a config file
pub fn load(path: &Path) -> Result<BridgeConfig, DaemonError> {
    let text = std::fs::read_to_string(path).map_err(|source| DaemonError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    let config: BridgeConfig =
        serde_json::from_str(&text).map_err(|source| DaemonError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}
