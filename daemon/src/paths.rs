/// Canonical file paths for hookline data files.
///
/// Both files live under `<config_dir>/hookline/` (`%APPDATA%` on Windows,
/// `$XDG_CONFIG_HOME` or `~/.config` elsewhere):
///   - config.toml  Read by the daemon, reloaded on change.
///   - status.toml  Written by the daemon for whatever presents its state.
use std::path::PathBuf;

use anyhow::{Context, Result};

const APP_DIR_NAME: &str = "hookline";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the hookline application data directory.
pub fn app_data_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("No per-user config directory on this platform")?;
    Ok(base.join(APP_DIR_NAME))
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join(CONFIG_FILE_NAME))
}

pub fn status_file_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join(STATUS_FILE_NAME))
}
