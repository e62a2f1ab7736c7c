//! Application configuration management.
//!
//! This module handles loading and saving the synchronization layer's
//! configuration: the API base URL, the active profile, list page size,
//! and offline mode.
//!
//! Configuration is stored at `~/.config/coursecache/config.json`.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "coursecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Items revealed per page in list screens
const DEFAULT_PAGE_SIZE: usize = 10;

/// Concurrent refreshes in a batch refresh
const DEFAULT_MAX_CONCURRENT_REFRESHES: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: Option<String>,
    /// Active account profile; caches are kept per profile
    pub profile: Option<String>,
    pub page_size: usize,
    pub max_concurrent_refreshes: usize,
    pub offline_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            profile: None,
            page_size: DEFAULT_PAGE_SIZE,
            max_concurrent_refreshes: DEFAULT_MAX_CONCURRENT_REFRESHES,
            offline_mode: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;

        let mut path = cache_dir.join(APP_NAME);
        if let Some(ref profile) = self.profile {
            path = path.join(profile);
        }
        Ok(path)
    }
}
