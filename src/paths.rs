//! Common paths for skythread data storage
//!
//! All data is stored under ~/.config/skythread/ on all platforms:
//! - config.toml - Hosts and client options
//! - store.enc - Encrypted key-value store (session, handle cache, settings)

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Get the data directory (~/.config/skythread/)
pub fn data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let dir = home.join(".config").join("skythread");
    fs::create_dir_all(&dir).context("Failed to create skythread directory")?;
    Ok(dir)
}

/// Get the config file path (~/.config/skythread/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("config.toml"))
}

/// Get the encrypted store path (~/.config/skythread/store.enc)
pub fn store_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("store.enc"))
}
