//! Panel configuration and subscription filters
//!
//! A `PanelConf` is the serializable description of one display panel. Its
//! field names follow the layout file format. Filtering is plain equality on
//! (bus, message, signal); an absent or empty filter field matches anything.

use crate::types::{DashError, DecodedSignal};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of panel kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelType {
    Value,
    Gauge,
    Plot,
    #[serde(rename = "multiplot")]
    MultiPlot,
    Table,
    Led,
}

impl PanelType {
    pub const ALL: [PanelType; 6] = [
        PanelType::Value,
        PanelType::Gauge,
        PanelType::Plot,
        PanelType::MultiPlot,
        PanelType::Table,
        PanelType::Led,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PanelType::Value => "value",
            PanelType::Gauge => "gauge",
            PanelType::Plot => "plot",
            PanelType::MultiPlot => "multiplot",
            PanelType::Table => "table",
            PanelType::Led => "led",
        }
    }
}

impl fmt::Display for PanelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PanelType {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PanelType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DashError::ConfigError(format!("unknown panel type '{}'", s)))
    }
}

/// Equality filter on (bus, message, signal)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalFilter {
    pub bus_name: Option<String>,
    pub message_name: Option<String>,
    pub signal_name: Option<String>,
    /// When false the filter matches no decoded signals at all
    pub use_dbc: bool,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}

impl SignalFilter {
    pub fn new(bus_name: Option<&str>, message_name: Option<&str>, signal_name: Option<&str>) -> Self {
        Self {
            bus_name: non_empty(bus_name),
            message_name: non_empty(message_name),
            signal_name: non_empty(signal_name),
            use_dbc: true,
        }
    }

    pub fn bus_match(&self, bus_name: &str) -> bool {
        self.bus_name.as_deref().map_or(true, |b| b == bus_name)
    }

    pub fn signal_match(&self, message_name: &str, signal_name: &str) -> bool {
        self.use_dbc
            && self.message_name.as_deref().map_or(true, |m| m == message_name)
            && self.signal_name.as_deref().map_or(true, |s| s == signal_name)
    }

    /// Bus and signal match combined
    pub fn matches(&self, signal: &DecodedSignal) -> bool {
        self.bus_match(&signal.bus_name) && self.signal_match(&signal.message_name, &signal.signal_name)
    }
}

/// One series of a multiplot panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSelection {
    #[serde(default)]
    pub bus_name: Option<String>,
    #[serde(default)]
    pub msg_name: String,
    #[serde(default)]
    pub sig_name: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl SignalSelection {
    pub fn new(bus_name: Option<&str>, msg_name: &str, sig_name: &str) -> Self {
        Self {
            bus_name: bus_name.map(str::to_string),
            msg_name: msg_name.to_string(),
            sig_name: sig_name.to_string(),
            color: None,
        }
    }

    pub fn filter(&self) -> SignalFilter {
        SignalFilter::new(self.bus_name.as_deref(), Some(&self.msg_name), Some(&self.sig_name))
    }

    /// Stable key identifying this series within its panel
    pub fn series_key(&self) -> String {
        let bus = self.bus_name.as_deref().filter(|b| !b.is_empty()).unwrap_or("(any)");
        format!("{}::{}::{}", bus, self.msg_name, self.sig_name)
    }

    /// Legend label
    pub fn label(&self) -> String {
        format!("{}:{}", self.msg_name, self.sig_name)
    }
}

/// Serializable description of one panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelConf {
    pub panel_id: String,
    pub panel_type: PanelType,
    pub title: String,

    // Subscription
    #[serde(default)]
    pub bus_name: Option<String>,
    #[serde(default = "default_true")]
    pub use_dbc: bool,
    #[serde(default)]
    pub msg_name: Option<String>,
    #[serde(default)]
    pub sig_name: Option<String>,

    // Display options
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub min_val: f64,
    #[serde(default = "default_max_val")]
    pub max_val: f64,
    #[serde(default = "default_plot_window")]
    pub plot_window_s: f64,

    /// Series of a multiplot panel, in legend order
    #[serde(default)]
    pub multi_signals: Vec<SignalSelection>,
    /// Rule lines of an LED panel, evaluated top to bottom
    #[serde(default)]
    pub led_rules: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_val() -> f64 {
    100.0
}

fn default_plot_window() -> f64 {
    10.0
}

impl PanelConf {
    pub fn new(panel_id: impl Into<String>, panel_type: PanelType, title: impl Into<String>) -> Self {
        Self {
            panel_id: panel_id.into(),
            panel_type,
            title: title.into(),
            bus_name: None,
            use_dbc: true,
            msg_name: None,
            sig_name: None,
            color: None,
            units: String::new(),
            min_val: 0.0,
            max_val: default_max_val(),
            plot_window_s: default_plot_window(),
            multi_signals: Vec::new(),
            led_rules: Vec::new(),
        }
    }

    /// Panel id of the form `<type>_<n>` derived from the current time
    pub fn generate_id(panel_type: PanelType) -> String {
        format!("{}_{}", panel_type, Utc::now().timestamp_millis().rem_euclid(1_000_000))
    }

    /// Builder method: restrict to one bus
    pub fn with_bus(mut self, bus_name: impl Into<String>) -> Self {
        self.bus_name = Some(bus_name.into());
        self
    }

    /// Builder method: restrict to one message
    pub fn with_message(mut self, msg_name: impl Into<String>) -> Self {
        self.msg_name = Some(msg_name.into());
        self
    }

    /// Builder method: restrict to one signal
    pub fn with_signal(mut self, sig_name: impl Into<String>) -> Self {
        self.sig_name = Some(sig_name.into());
        self
    }

    /// Builder method: set the gauge/readout range
    pub fn with_range(mut self, min_val: f64, max_val: f64) -> Self {
        self.min_val = min_val;
        self.max_val = max_val;
        self
    }

    /// Builder method: add a multiplot series
    pub fn add_series(mut self, selection: SignalSelection) -> Self {
        self.multi_signals.push(selection);
        self
    }

    /// Builder method: append an LED rule line
    pub fn add_led_rule(mut self, rule: impl Into<String>) -> Self {
        self.led_rules.push(rule.into());
        self
    }

    /// Filter built from the subscription fields
    pub fn filter(&self) -> SignalFilter {
        SignalFilter {
            use_dbc: self.use_dbc,
            ..SignalFilter::new(
                self.bus_name.as_deref(),
                self.msg_name.as_deref(),
                self.sig_name.as_deref(),
            )
        }
    }
}
