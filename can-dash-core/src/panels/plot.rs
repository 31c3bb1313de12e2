//! Time-series panels
//!
//! Points are stored as (seconds since panel start, value). Nothing is
//! emitted per event; the periodic refresh trims each series to the plot
//! window and emits the whole visible set.

use super::{PanelUpdate, SeriesData};
use crate::panel::{PanelConf, SignalFilter, SignalSelection};
use crate::types::HubEvent;
use std::collections::VecDeque;

/// Shortest window a plot will trim to
pub const MIN_PLOT_WINDOW: f64 = 0.5;

/// Append-only series trimmed from the front
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    points: VecDeque<(f64, f64)>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, t: f64, value: f64) {
        self.points.push_back((t, value));
    }

    /// Drop points with t < cutoff
    pub fn trim_before(&mut self, cutoff: f64) {
        while self.points.front().map_or(false, |&(t, _)| t < cutoff) {
            self.points.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> Vec<(f64, f64)> {
        self.points.iter().copied().collect()
    }

    pub fn last(&self) -> Option<(f64, f64)> {
        self.points.back().copied()
    }
}

fn effective_window(conf: &PanelConf) -> f64 {
    conf.plot_window_s.max(MIN_PLOT_WINDOW)
}

/// Single-signal plot
#[derive(Debug)]
pub struct PlotPanel {
    conf: PanelConf,
    filter: SignalFilter,
    t0: f64,
    series: TimeSeries,
}

impl PlotPanel {
    pub fn new(conf: PanelConf, t0: f64) -> Self {
        let filter = conf.filter();
        Self {
            conf,
            filter,
            t0,
            series: TimeSeries::new(),
        }
    }

    pub fn conf(&self) -> &PanelConf {
        &self.conf
    }

    pub fn series(&self) -> &TimeSeries {
        &self.series
    }

    pub fn handle(&mut self, event: &HubEvent) {
        if let HubEvent::Signal(signal) = event {
            if self.filter.matches(signal) {
                self.series.push(signal.timestamp - self.t0, signal.value);
            }
        }
    }

    pub fn refresh(&mut self, now: f64) -> PanelUpdate {
        let t_now = now - self.t0;
        let window = effective_window(&self.conf);
        self.series.trim_before(t_now - window);

        let label = match (&self.conf.msg_name, &self.conf.sig_name) {
            (Some(msg), Some(sig)) => format!("{}:{}", msg, sig),
            _ => self.conf.title.clone(),
        };

        PanelUpdate::Series {
            series: vec![SeriesData {
                key: self.conf.panel_id.clone(),
                label,
                color: self.conf.color.clone(),
                points: self.series.points(),
            }],
            x_range: (t_now - window, t_now),
        }
    }
}

#[derive(Debug)]
struct SelectedSeries {
    selection: SignalSelection,
    filter: SignalFilter,
    series: TimeSeries,
}

/// Several independently filtered series on one plot
#[derive(Debug)]
pub struct MultiPlotPanel {
    conf: PanelConf,
    t0: f64,
    selected: Vec<SelectedSeries>,
}

impl MultiPlotPanel {
    pub fn new(conf: PanelConf, t0: f64) -> Self {
        let selected = conf
            .multi_signals
            .iter()
            .map(|selection| SelectedSeries {
                selection: selection.clone(),
                filter: SignalFilter {
                    use_dbc: conf.use_dbc,
                    ..selection.filter()
                },
                series: TimeSeries::new(),
            })
            .collect();
        Self { conf, t0, selected }
    }

    pub fn conf(&self) -> &PanelConf {
        &self.conf
    }

    /// Series for the selection with `key`, see [`SignalSelection::series_key`]
    pub fn series(&self, key: &str) -> Option<&TimeSeries> {
        self.selected
            .iter()
            .find(|s| s.selection.series_key() == key)
            .map(|s| &s.series)
    }

    pub fn handle(&mut self, event: &HubEvent) {
        let HubEvent::Signal(signal) = event else {
            return;
        };
        let t = signal.timestamp - self.t0;
        for selected in self.selected.iter_mut().filter(|s| s.filter.matches(signal)) {
            selected.series.push(t, signal.value);
        }
    }

    pub fn refresh(&mut self, now: f64) -> PanelUpdate {
        let t_now = now - self.t0;
        let window = effective_window(&self.conf);

        let series = self
            .selected
            .iter_mut()
            .map(|selected| {
                selected.series.trim_before(t_now - window);
                SeriesData {
                    key: selected.selection.series_key(),
                    label: selected.selection.label(),
                    color: selected.selection.color.clone(),
                    points: selected.series.points(),
                }
            })
            .collect();

        PanelUpdate::Series {
            series,
            x_range: (t_now - window, t_now),
        }
    }
}
