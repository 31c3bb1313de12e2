//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use can_dash_core::{BusConf, InterfaceKind, MAX_BUSES};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CAN_DASH_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_buses")]
    pub buses: Vec<BusConf>,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DbConfig {
    /// DBC file loaded at startup
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UiConfig {
    #[serde(default = "default_status_interval")]
    pub status_interval_ms: u64,
    #[serde(default = "default_true")]
    pub autostart: bool,
    /// Layout file with panels (and optionally buses)
    pub layout: Option<PathBuf>,
    /// Capacity of the dashboard event queue; 0 means unbounded
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_buses() -> Vec<BusConf> {
    vec![
        BusConf::new("BUS1", InterfaceKind::Virtual, "vcan0").with_enabled(true),
        BusConf::new("BUS2", InterfaceKind::Virtual, "vcan1"),
        BusConf::new("BUS3", InterfaceKind::Virtual, "vcan2"),
    ]
}

fn default_status_interval() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    65536
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: default_status_interval(),
            autostart: true,
            layout: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            buses: default_buses(),
            db: DbConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

impl UiConfig {
    /// Queue capacity as the core expects it
    pub fn queue_capacity(&self) -> Option<usize> {
        (self.queue_capacity > 0).then_some(self.queue_capacity)
    }
}

/// Resolve the config file: explicit path, then the environment variable,
/// then `config.toml` in the working directory if it exists
pub fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
        log::warn!("{} points to {:?}, which is not a file", CONFIG_ENV_VAR, path);
    }

    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    local.is_file().then_some(local)
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate(&config).with_context(|| format!("Invalid config file: {:?}", path))?;
    Ok(config)
}

/// Load the resolved config file, or defaults when there is none
pub fn load_or_default(explicit: Option<&Path>) -> Result<AppConfig> {
    match find_config_path(explicit) {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            load_config(&path)
        }
        None => {
            log::info!("No config file found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.ui.status_interval_ms == 0 {
        bail!("ui.status_interval_ms must be greater than zero");
    }

    let enabled = config.buses.iter().filter(|b| b.enabled).count();
    if enabled > MAX_BUSES {
        log::warn!(
            "{} buses enabled, only the first {} will be started",
            enabled,
            MAX_BUSES
        );
    }
    Ok(())
}
