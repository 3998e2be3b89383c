//! Configuration discovery for the CLI.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub use rh_core::config::Config;

/// Locations searched when no `--config` is given, in order.
const DEFAULT_PATHS: [&str; 2] = ["./reelhaul.toml", "~/.config/reelhaul/config.toml"];

/// Load and parse a config file, logging any validation warnings.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    for warning in config.validate() {
        tracing::warn!(path = %path.display(), "{warning}");
    }
    Ok(config)
}

/// First config file that exists among the default locations.
pub fn find_config() -> Option<PathBuf> {
    DEFAULT_PATHS
        .iter()
        .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
        .find(|p| p.exists())
}

/// Load `custom_path` if given, else the first default location that
/// exists, else built-in defaults.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }
    match find_config() {
        Some(path) => load_config(&path),
        None => Ok(Config::default()),
    }
}
