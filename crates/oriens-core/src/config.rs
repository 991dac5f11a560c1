//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, page sizes, the chart window and timeouts.
//!
//! Configuration is stored at `~/.config/oriens/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::REQUEST_TIMEOUT_SECS;
use crate::sync::ledger::{AGGREGATE_MONTHS, AGGREGATE_PAGE_SIZE, TABLE_PAGE_SIZE};
use crate::sync::{LedgerSettings, MUTATION_TIMEOUT_SECS};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "oriens";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment override for the API base URL
pub const API_URL_ENV: &str = "ORIENS_API_URL";

const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub table_page_size: u32,
    pub aggregate_page_size: u32,
    pub aggregate_months: u32,
    pub request_timeout_secs: u64,
    pub mutation_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            table_page_size: TABLE_PAGE_SIZE,
            aggregate_page_size: AGGREGATE_PAGE_SIZE,
            aggregate_months: AGGREGATE_MONTHS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            mutation_timeout_secs: MUTATION_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Loads the config file (or defaults) and applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                self.api_url = url.to_string();
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Root cache directory. Per-user data lives in a subdirectory named by user id.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            table_page_size: self.table_page_size.max(1),
            aggregate_page_size: self.aggregate_page_size.max(1),
            aggregate_months: self.aggregate_months.max(1),
            mutation_timeout: self.mutation_timeout(),
        }
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_secs(self.mutation_timeout_secs.max(1))
    }
}
