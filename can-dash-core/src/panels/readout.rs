//! Single-value panels: numeric readout, gauge and status LED

use super::PanelUpdate;
use crate::led::LedRuleSet;
use crate::panel::{PanelConf, SignalFilter};
use crate::types::HubEvent;

fn matching_value(filter: &SignalFilter, event: &HubEvent) -> Option<f64> {
    match event {
        HubEvent::Signal(signal) if filter.matches(signal) => Some(signal.value),
        _ => None,
    }
}

/// Latest matching value with its units
#[derive(Debug)]
pub struct ValuePanel {
    conf: PanelConf,
    filter: SignalFilter,
    last: Option<f64>,
}

impl ValuePanel {
    pub fn new(conf: PanelConf) -> Self {
        let filter = conf.filter();
        Self {
            conf,
            filter,
            last: None,
        }
    }

    pub fn conf(&self) -> &PanelConf {
        &self.conf
    }

    pub fn last_value(&self) -> Option<f64> {
        self.last
    }

    pub fn handle(&mut self, event: &HubEvent) -> Option<PanelUpdate> {
        let value = matching_value(&self.filter, event)?;
        self.last = Some(value);
        Some(PanelUpdate::Value {
            value,
            units: self.conf.units.clone(),
        })
    }
}

/// Latest matching value placed within [min_val, max_val]
#[derive(Debug)]
pub struct GaugePanel {
    conf: PanelConf,
    filter: SignalFilter,
    last: Option<f64>,
}

impl GaugePanel {
    pub fn new(conf: PanelConf) -> Self {
        let filter = conf.filter();
        Self {
            conf,
            filter,
            last: None,
        }
    }

    pub fn conf(&self) -> &PanelConf {
        &self.conf
    }

    pub fn last_value(&self) -> Option<f64> {
        self.last
    }

    /// Clamped position of `value` in the configured range; 0 for an empty range
    pub fn fraction(&self, value: f64) -> f64 {
        let span = self.conf.max_val - self.conf.min_val;
        if span <= 0.0 || !value.is_finite() {
            return 0.0;
        }
        ((value - self.conf.min_val) / span).clamp(0.0, 1.0)
    }

    pub fn handle(&mut self, event: &HubEvent) -> Option<PanelUpdate> {
        let value = matching_value(&self.filter, event)?;
        self.last = Some(value);
        Some(PanelUpdate::Gauge {
            value,
            fraction: self.fraction(value),
            units: self.conf.units.clone(),
        })
    }
}

/// Colour indicator driven by the LED rule engine
#[derive(Debug)]
pub struct LedPanel {
    conf: PanelConf,
    filter: SignalFilter,
    rules: LedRuleSet,
    color: Option<String>,
}

impl LedPanel {
    pub fn new(conf: PanelConf) -> Self {
        let filter = conf.filter();
        let rules = LedRuleSet::parse(&conf.led_rules);
        if rules.len() < conf.led_rules.len() {
            log::warn!(
                "LED panel {}: {} of {} rules could not be parsed",
                conf.panel_id,
                conf.led_rules.len() - rules.len(),
                conf.led_rules.len()
            );
        }
        Self {
            conf,
            filter,
            rules,
            color: None,
        }
    }

    pub fn conf(&self) -> &PanelConf {
        &self.conf
    }

    pub fn rules(&self) -> &LedRuleSet {
        &self.rules
    }

    /// Current colour; None is neutral
    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn handle(&mut self, event: &HubEvent) -> Option<PanelUpdate> {
        let value = matching_value(&self.filter, event)?;
        self.color = self.rules.color_for(value).map(str::to_string);
        Some(PanelUpdate::Led {
            value,
            color: self.color.clone(),
        })
    }
}
