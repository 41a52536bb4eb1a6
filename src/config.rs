//! Configuration module for skythread

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::path::PathBuf;

use crate::paths;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// AppView used for anonymous reads
    #[serde(default = "default_appview_host")]
    pub appview_host: String,

    /// Public (cached) AppView used by the timeline scanners
    #[serde(default = "default_public_appview_host")]
    pub public_appview_host: String,

    /// Host serving quote counts and quote lists
    #[serde(default = "default_blue_host")]
    pub blue_host: String,

    /// Backlinks index used to discover hidden replies
    #[serde(default = "default_constellation_host")]
    pub constellation_host: String,

    /// PDS used when logging in with an email address
    #[serde(default = "default_pds_host")]
    pub default_pds_host: String,

    /// Web app host that post URLs point to
    #[serde(default = "default_web_host")]
    pub web_host: String,

    /// Reply depth requested from getPostThread
    #[serde(default = "default_thread_depth")]
    pub thread_depth: u32,

    /// Refresh the access token when it expires within this many seconds
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: i64,

    /// HTTP request timeout
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_appview_host() -> String {
    "api.bsky.app".to_string()
}

fn default_public_appview_host() -> String {
    "public.api.bsky.app".to_string()
}

fn default_blue_host() -> String {
    "blue.mackuba.eu".to_string()
}

fn default_constellation_host() -> String {
    "constellation.microcosm.blue".to_string()
}

fn default_pds_host() -> String {
    "bsky.social".to_string()
}

fn default_web_host() -> String {
    "bsky.app".to_string()
}

fn default_thread_depth() -> u32 {
    10
}

fn default_refresh_margin() -> i64 {
    60
}

fn default_http_timeout() -> u64 {
    15
}

impl Default for Config {
    fn default() -> Self {
        Self {
            appview_host: default_appview_host(),
            public_appview_host: default_public_appview_host(),
            blue_host: default_blue_host(),
            constellation_host: default_constellation_host(),
            default_pds_host: default_pds_host(),
            web_host: default_web_host(),
            thread_depth: default_thread_depth(),
            refresh_margin_secs: default_refresh_margin(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        paths::config_path()
    }

    /// Load config from the default path or create default
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }
}
