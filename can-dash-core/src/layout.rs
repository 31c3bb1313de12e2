//! Dashboard layout file
//!
//! A layout is the JSON record `{buses, panels, dock_state_b64}`. Loading is
//! tolerant: a bus or panel entry that does not deserialize is logged and
//! skipped, so one bad entry never discards the rest of the layout.

use crate::bus::BusConf;
use crate::panel::PanelConf;
use crate::types::{DashError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Default layout file name
pub const DEFAULT_LAYOUT_FILE: &str = "dashboard_layout.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub buses: Vec<BusConf>,
    #[serde(default)]
    pub panels: Vec<PanelConf>,
    /// Opaque window-arrangement state, carried through untouched
    #[serde(default)]
    pub dock_state_b64: String,
}

impl Layout {
    pub fn new(buses: Vec<BusConf>, panels: Vec<PanelConf>) -> Self {
        Self {
            buses,
            panels,
            dock_state_b64: String::new(),
        }
    }

    /// Parse layout JSON, skipping malformed entries.
    ///
    /// Only a document that is not a JSON object at all is an error.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(json)
            .map_err(|e| DashError::ConfigError(format!("layout is not valid JSON: {}", e)))?;
        let Value::Object(mut root) = root else {
            return Err(DashError::ConfigError("layout root must be an object".to_string()));
        };

        let buses = tolerant_list(root.remove("buses"), "bus");
        let panels = tolerant_list(root.remove("panels"), "panel");
        let dock_state_b64 = match root.remove("dock_state_b64") {
            Some(Value::String(state)) => state,
            _ => String::new(),
        };

        Ok(Self {
            buses,
            panels,
            dock_state_b64,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let layout = Self::from_json_str(&content)?;
        log::info!(
            "Layout loaded from {:?}: {} buses, {} panels",
            path,
            layout.buses.len(),
            layout.panels.len()
        );
        Ok(layout)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DashError::ConfigError(format!("failed to serialize layout: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json_string()?)?;
        log::info!("Layout saved to {:?}", path);
        Ok(())
    }
}

fn tolerant_list<T: DeserializeOwned>(value: Option<Value>, what: &str) -> Vec<T> {
    let entries = match value {
        Some(Value::Array(entries)) => entries,
        Some(Value::Null) | None => return Vec::new(),
        Some(other) => {
            let err = DashError::ConfigError(format!("layout {} list is not an array: {}", what, other));
            log::warn!("{}", err);
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(item) => Some(item),
            Err(e) => {
                let err = DashError::ConfigError(format!("skipping {} entry {}: {}", what, index, e));
                log::warn!("{}", err);
                None
            }
        })
        .collect()
}
