// src/config.rs

//! Loading, defaulting, and validating the agent's `deadman.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::error::DeadmanError;

/// On-disk shape of `deadman.toml`, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    pub deadman: RawDeadmanSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDeadmanSection {
    #[serde(default = "default_tick_time")]
    pub tick_time: f64,

    pub plugins: Vec<String>,

    pub group: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_tick_time() -> f64 {
    2.0
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Validated configuration used by the rest of the crate.
#[derive(Debug, Clone)]
pub struct Config {
    pub tick_time: Duration,
    pub plugins: Vec<String>,
    pub group: String,
    pub log_level: String,
}

impl Config {
    /// Loads `path`, parses it as TOML, and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(DeadmanError::from)?;
        let raw: RawConfig = toml::from_str(&text).map_err(DeadmanError::from)?;
        raw.validate()
    }
}

impl RawConfig {
    pub fn validate(self) -> Result<Config> {
        let section = self.deadman;

        if !(section.tick_time > 0.0) {
            return Err(anyhow!(
                "deadman.tick_time must be greater than 0, got {}",
                section.tick_time
            ));
        }

        if section.plugins.is_empty() {
            return Err(anyhow!(
                "deadman.plugins must list at least one capability provider"
            ));
        }

        if section.group.trim().is_empty() {
            return Err(anyhow!("deadman.group must be a non-empty string"));
        }

        Ok(Config {
            tick_time: Duration::from_secs_f64(section.tick_time),
            plugins: section.plugins,
            group: section.group,
            log_level: section.log_level,
        })
    }
}
