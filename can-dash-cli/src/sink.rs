//! Headless rendering: panel updates go to the log

use can_dash_core::{PanelUpdate, RenderSink};
use std::collections::BTreeMap;

/// Render sink that logs every update and remembers the latest per panel
#[derive(Debug, Default)]
pub struct LogSink {
    latest: BTreeMap<String, String>,
    updates: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total updates rendered
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Latest rendering of each panel (table rows listed separately)
    pub fn latest(&self) -> impl Iterator<Item = (&str, &str)> {
        self.latest.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl RenderSink for LogSink {
    fn render(&mut self, panel_id: &str, update: &PanelUpdate) {
        self.updates += 1;
        let key = match update {
            PanelUpdate::TableRow(row) => format!("{}/{}", panel_id, row.id_hex()),
            _ => panel_id.to_string(),
        };
        let text = describe(update);
        log::debug!("[{}] {}", key, text);
        self.latest.insert(key, text);
    }
}

/// One-line description of an update
pub fn describe(update: &PanelUpdate) -> String {
    match update {
        PanelUpdate::Value { value, units } => format!("{:.3} {}", value, units).trim_end().to_string(),
        PanelUpdate::Gauge {
            value,
            fraction,
            units,
        } => format!("{:.3} {} ({:.0}%)", value, units, fraction * 100.0),
        PanelUpdate::Series { series, x_range } => {
            let points: usize = series.iter().map(|s| s.points.len()).sum();
            format!(
                "{} series, {} points in [{:.1}, {:.1}] s",
                series.len(),
                points,
                x_range.0,
                x_range.1
            )
        }
        PanelUpdate::TableRow(row) => {
            let cycle = row
                .cycle_ms
                .map(|ms| format!("{:.1} ms", ms))
                .unwrap_or_else(|| "-".to_string());
            let signals = row
                .signals
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join(" ");
            format!(
                "{} {} {} dlc={} [{}] cycle {} {}",
                row.bus_name,
                row.id_hex(),
                row.message_name.as_deref().unwrap_or("?"),
                row.dlc,
                row.data_hex,
                cycle,
                signals
            )
            .trim_end()
            .to_string()
        }
        PanelUpdate::Led { value, color } => {
            format!("{} -> {}", value, color.as_deref().unwrap_or("neutral"))
        }
    }
}
